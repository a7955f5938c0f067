// Desktop notifications for supervisor alerts

use notify_rust::{Notification, Timeout};

/// Where user-visible messages go.
pub trait Notifier: Send {
    /// Something went wrong with the mount; shown prominently.
    fn alert(&self, title: &str, body: &str);

    /// Informational message that needs no action.
    fn notice(&self, title: &str, body: &str);
}

/// Shows messages as native desktop notifications.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn alert(&self, title: &str, body: &str) {
        show(title, body, "dialog-error", Timeout::Milliseconds(10000));
    }

    fn notice(&self, title: &str, body: &str) {
        show(title, body, "dialog-information", Timeout::Milliseconds(5000));
    }
}

fn show(title: &str, body: &str, icon: &str, timeout: Timeout) {
    if let Err(e) = Notification::new()
        .appname("CloudMount")
        .summary(title)
        .body(body)
        .icon(icon)
        .timeout(timeout)
        .show()
    {
        tracing::warn!("Failed to show notification \"{title}\": {e}");
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Shown {
        Alert(String),
        Notice(String),
    }

    /// Records titles instead of showing anything.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        pub shown: Arc<Mutex<Vec<Shown>>>,
    }

    impl RecordingNotifier {
        pub fn alerts(&self) -> Vec<String> {
            self.shown
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Shown::Alert(title) => Some(title.clone()),
                    Shown::Notice(_) => None,
                })
                .collect()
        }

        pub fn notices(&self) -> Vec<String> {
            self.shown
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Shown::Notice(title) => Some(title.clone()),
                    Shown::Alert(_) => None,
                })
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, title: &str, _body: &str) {
            self.shown.lock().unwrap().push(Shown::Alert(title.to_string()));
        }

        fn notice(&self, title: &str, _body: &str) {
            self.shown.lock().unwrap().push(Shown::Notice(title.to_string()));
        }
    }
}
