use std::fmt;

pub const NOTICE_HEADING: &str = "Flix";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NoProviders,
    NoResults,
    ResolveTimeout { provider: String },
    ResolveFailed { provider: String },
    InvalidInvocation { expected: usize, got: usize },
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::NoProviders => "No lookup sources available".to_string(),
            Notice::NoResults => "No results found".to_string(),
            Notice::ResolveTimeout { provider } => {
                format!("The selected source did not respond in time ({provider})")
            }
            Notice::ResolveFailed { provider } => {
                format!("The selected source could not provide a stream ({provider})")
            }
            Notice::InvalidInvocation { expected, got } => {
                format!("Invalid provider invocation: expected {expected} arguments, got {got}")
            }
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

pub trait UserNotifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl UserNotifier for StderrNotifier {
    fn notify(&self, notice: &Notice) {
        eprintln!("[{NOTICE_HEADING}] {notice}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notices_are_distinct() {
        let messages = [
            Notice::NoProviders.message(),
            Notice::NoResults.message(),
            Notice::ResolveTimeout {
                provider: "script.flix.a".to_string(),
            }
            .message(),
        ];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert!(messages[2].contains("script.flix.a"));
    }
}
