use std::path::PathBuf;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use zenai_core::{
    bootstrap, BootstrapOutcome, ChannelSink, ChatClient, Config, ConfigStore, FilePageProvider,
    FileConfigStore, PageContextProvider, PartialReplyPolicy, Session, UrlPageProvider,
};

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "zenai")]
#[command(version, about = "Chat with an Azure OpenAI deployment about a web page")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Args, Default)]
struct ChatArgs {
    /// Page to use as context: a local HTML/text file or an http(s) URL
    #[arg(short, long)]
    page: Option<String>,

    /// Drop a partially streamed reply when the connection fails
    #[arg(long)]
    discard_partial: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat interface (default)
    Chat(ChatArgs),
    /// Show or change the stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Send a small request to check the stored settings
    Test,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the settings, with the API key masked
    Show,
    /// Update settings; unspecified fields keep their stored values
    Set(SetArgs),
    /// Print the config file location
    Path,
}

#[derive(Args, Default)]
struct SetArgs {
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    deployment: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_version: Option<String>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Request timeout in seconds; 0 removes it
    #[arg(long)]
    timeout: Option<u64>,
}

impl SetArgs {
    fn apply(self, mut config: Config) -> Config {
        if let Some(v) = self.endpoint {
            config.api_endpoint = v;
        }
        if let Some(v) = self.key {
            config.api_key = v;
        }
        if let Some(v) = self.deployment {
            config.deployment = v;
        }
        if let Some(v) = self.model {
            config.model_name = v;
        }
        if let Some(v) = self.api_version {
            config.api_version = v;
        }
        if let Some(v) = self.max_tokens {
            config.max_tokens = v;
        }
        if let Some(secs) = self.timeout {
            config.request_timeout_secs = (secs > 0).then_some(secs);
        }
        config.normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = match logging::init() {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };

    let store = match cli.config {
        Some(path) => FileConfigStore::new(path),
        None => FileConfigStore::open_default()?,
    };

    match cli.command {
        None => run_chat(store, cli.chat).await,
        Some(Commands::Chat(args)) => run_chat(store, args).await,
        Some(Commands::Config { action }) => run_config(&store, action),
        Some(Commands::Test) => run_test(&store).await,
    }
}

fn run_config(store: &FileConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = store.get()?;
            println!("endpoint:    {}", config.api_endpoint);
            println!("api key:     {}", config.masked_api_key());
            println!("deployment:  {}", config.deployment);
            println!("model:       {}", config.model_name);
            println!("api version: {}", config.api_version);
            println!("max tokens:  {}", config.max_tokens);
            match config.request_timeout_secs {
                Some(secs) => println!("timeout:     {}s", secs),
                None => println!("timeout:     none"),
            }
            if let Err(e) = config.validate() {
                println!("\n{}", e);
            }
        }
        ConfigAction::Set(args) => {
            let config = args.apply(store.get()?);
            store.set(&config)?;
            println!("Settings saved successfully!");
        }
        ConfigAction::Path => println!("{}", store.path().display()),
    }
    Ok(())
}

async fn run_test(store: &FileConfigStore) -> Result<()> {
    let config = store.get()?.with_env_overrides();
    if !config.is_valid() {
        println!("Please fill in all required fields.");
        return Ok(());
    }

    println!("Testing connection...");
    match ChatClient::new().test_connection(&config).await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => {
            warn!(error = %e, "connection test failed");
            println!("Connection failed: {}", e);
        }
    }
    Ok(())
}

fn page_provider(page: &str) -> Box<dyn PageContextProvider> {
    if page.starts_with("http://") || page.starts_with("https://") {
        Box::new(UrlPageProvider::new(page))
    } else {
        Box::new(FilePageProvider::new(page))
    }
}

async fn run_chat(store: FileConfigStore, args: ChatArgs) -> Result<()> {
    let private_path = store.path().with_file_name("config.private.json");
    match bootstrap(&store, Some(&private_path)) {
        Ok(BootstrapOutcome::Imported) => info!("settings imported from {}", private_path.display()),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "config bootstrap failed"),
    }

    let provider = args.page.as_deref().map(page_provider);
    let policy = if args.discard_partial {
        PartialReplyPolicy::Discard
    } else {
        PartialReplyPolicy::Keep
    };

    let session = Session::start(&store, provider.as_deref(), ChatClient::new())
        .await?
        .with_partial_policy(policy);

    let config: Config = session.config().clone();
    let (sink, sink_events) = ChannelSink::channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let mut app = App::new(&config, session.page_context(), store, commands_tx);

    let session_task = tokio::spawn(session.run(commands_rx, sink));

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(sink_events);

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    drop(app);
    session_task.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> Config {
        Config {
            api_endpoint: "https://x".to_string(),
            api_key: "k".to_string(),
            deployment: "dep".to_string(),
            request_timeout_secs: Some(30),
            ..Config::default()
        }
    }

    #[test]
    fn test_set_keeps_unspecified_fields() {
        let args = SetArgs {
            key: Some(" new-key ".to_string()),
            ..SetArgs::default()
        };
        let config = args.apply(stored());
        assert_eq!(config.api_key, "new-key");
        assert_eq!(config.api_endpoint, "https://x");
        assert_eq!(config.request_timeout_secs, Some(30));
    }

    #[test]
    fn test_zero_timeout_clears_it() {
        let args = SetArgs {
            timeout: Some(0),
            ..SetArgs::default()
        };
        assert_eq!(args.apply(stored()).request_timeout_secs, None);

        let args = SetArgs {
            timeout: Some(5),
            ..SetArgs::default()
        };
        assert_eq!(args.apply(Config::default()).request_timeout_secs, Some(5));
    }

    #[test]
    fn test_cli_parses_set_subcommand() {
        let cli = Cli::try_parse_from(["zenai", "config", "set", "--timeout", "0", "--max-tokens", "256"]).unwrap();
        match cli.command {
            Some(Commands::Config { action: ConfigAction::Set(args) }) => {
                assert_eq!(args.timeout, Some(0));
                assert_eq!(args.max_tokens, Some(256));
            }
            _ => panic!("expected config set"),
        }
    }
}
