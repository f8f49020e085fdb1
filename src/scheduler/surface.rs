use log::info;

/// Where the countdown is shown to the user.
pub trait CountdownSurface: Send + Sync {
    fn show(&self, title: &str);
    fn set_rating_line(&self, line: &str);
    fn set_countdown(&self, text: &str);
    fn set_cancel_enabled(&self, enabled: bool);
    fn close(&self);
}

/// Headless surface: the countdown goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSurface;

impl CountdownSurface for LogSurface {
    fn show(&self, title: &str) {
        info!("[countdown] {title}");
    }

    fn set_rating_line(&self, line: &str) {
        info!("[countdown] {line}");
    }

    fn set_countdown(&self, text: &str) {
        info!("[countdown] {text}");
    }

    fn set_cancel_enabled(&self, enabled: bool) {
        if !enabled {
            info!("[countdown] firing; cancel disabled");
        }
    }

    fn close(&self) {
        info!("[countdown] closed");
    }
}
