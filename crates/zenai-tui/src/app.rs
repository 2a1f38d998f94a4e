use tokio::sync::mpsc;
use tracing::{debug, warn};
use zenai_core::{
    ChatRole, Config, ConfigStore, FileConfigStore, MessageHandle, PageContext, SessionCommand,
    SinkEvent, StatusKind,
};

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// One rendered chat entry. The session owns the real transcript; this is display state only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub handle: MessageHandle,
    pub role: ChatRole,
    pub text: String,
    /// Shows the streaming cursor, or the typing indicator while `text` is empty.
    pub pending: bool,
}

pub struct App {
    pub should_quit: bool,

    // Chat display state, driven by session events
    pub entries: Vec<ChatEntry>,
    pub status: Option<(String, StatusKind)>,
    pub busy: bool,

    // Input state
    config_error: Option<String>,
    awaiting_echo: bool, // submitted, waiting for the session to accept it
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Scroll state
    pub scroll: u16,
    pub follow_bottom: bool,
    pub chat_height: u16, // inner height of chat area, updated during render
    pub chat_width: u16,  // inner width of chat area, updated during render

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Header info
    pub page_title: Option<String>,
    pub deployment: String,
    pub model_name: String,

    store: FileConfigStore,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl App {
    pub fn new(
        config: &Config,
        page: Option<&PageContext>,
        store: FileConfigStore,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        let config_error = config.validate().err().map(|e| e.to_string());
        let status = if config_error.is_none() {
            None
        } else {
            Some((
                "Not configured yet: run `zenai config set --endpoint .. --key .. --deployment ..`, then Ctrl+R".to_string(),
                StatusKind::Info,
            ))
        };

        Self {
            should_quit: false,
            entries: Vec::new(),
            status,
            busy: false,
            config_error,
            awaiting_echo: false,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            follow_bottom: true,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            page_title: page.map(|p| {
                if p.title.is_empty() {
                    p.url.clone()
                } else {
                    p.title.clone()
                }
            }),
            deployment: config.deployment.clone(),
            model_name: config.model_name.clone(),
            store,
            commands,
        }
    }

    pub fn apply(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::Append { handle, role, text, pending } => {
                if role == ChatRole::User && self.awaiting_echo {
                    self.awaiting_echo = false;
                    self.input.clear();
                    self.cursor = 0;
                }
                self.entries.push(ChatEntry { handle, role, text, pending });
                self.follow_bottom = true;
            }
            SinkEvent::Update { handle, text } => {
                if let Some(entry) = self.entry_mut(handle) {
                    entry.text = text;
                }
            }
            SinkEvent::Finish(handle) => {
                if let Some(entry) = self.entry_mut(handle) {
                    entry.pending = false;
                }
            }
            SinkEvent::Remove(handle) => {
                self.entries.retain(|e| e.handle != handle);
            }
            SinkEvent::Status { text, kind } => {
                // A rejected submit reports an error and never echoes the input
                if kind == StatusKind::Error {
                    self.awaiting_echo = false;
                }
                self.status = Some((text, kind));
            }
            SinkEvent::ClearStatus => self.status = None,
            SinkEvent::Busy(busy) => {
                self.busy = busy;
                if !busy {
                    self.awaiting_echo = false;
                }
            }
        }
    }

    fn entry_mut(&mut self, handle: MessageHandle) -> Option<&mut ChatEntry> {
        self.entries.iter_mut().find(|e| e.handle == handle)
    }

    /// Sends the input as a new turn. Ignored while a turn is in flight.
    /// The input is only cleared once the session echoes it back as a user entry.
    pub fn submit(&mut self) {
        if self.busy || self.awaiting_echo || self.input.trim().is_empty() {
            return;
        }
        if let Some(error) = &self.config_error {
            self.status = Some((error.clone(), StatusKind::Error));
            return;
        }
        self.awaiting_echo = true;
        self.send(SessionCommand::Submit(self.input.clone()));
    }

    pub fn cancel(&mut self) {
        if self.busy {
            self.send(SessionCommand::Cancel);
        }
    }

    /// Re-reads the config store and hands the result to the session.
    pub fn reload_config(&mut self) {
        match self.store.get() {
            Ok(config) => {
                let config = config.with_env_overrides();
                self.deployment = config.deployment.clone();
                self.model_name = config.model_name.clone();
                self.config_error = config.validate().err().map(|e| e.to_string());
                self.status = Some(if config.is_valid() {
                    ("Settings reloaded.".to_string(), StatusKind::Success)
                } else {
                    ("Settings reloaded, but they are still incomplete.".to_string(), StatusKind::Error)
                });
                self.send(SessionCommand::ConfigChanged(config));
            }
            Err(e) => {
                warn!(error = %e, "failed to reload config");
                self.status = Some((format!("Error loading settings: {}", e), StatusKind::Error));
            }
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            debug!("session task has stopped");
        }
    }

    // Input editing

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    // Scrolling

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines);
        let max = self.max_scroll();
        if self.scroll >= max {
            self.scroll = max;
            self.follow_bottom = true;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.entries.iter().any(|e| e.pending) {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Called after each layout pass so the newest text stays visible while following.
    pub fn update_scroll(&mut self) {
        let max = self.max_scroll();
        if self.follow_bottom || self.scroll > max {
            self.scroll = max;
        }
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.total_lines().saturating_sub(visible_height)
    }

    /// Wrapped line count of the chat pane, mirroring the layout in `ui`.
    fn total_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 { self.chat_width as usize } else { 50 };

        let mut total_lines: usize = 0;
        for entry in &self.entries {
            total_lines += 1; // Role line ("You:" or "ZenAi:")
            let body = if entry.text.is_empty() { " " } else { entry.text.as_str() };
            for line in body.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count() + usize::from(entry.pending);
                total_lines += (char_count.max(1) - 1) / wrap_width + 1;
            }
            total_lines += 1; // Blank line after message
        }
        u16::try_from(total_lines).unwrap_or(u16::MAX)
    }
}
