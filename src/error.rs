#[derive(Debug)]
pub enum SchedError {
    InvalidCronExpression { expr: String, reason: String },
    Lock(String),
    Publish(String),
    Queue(String),
    Command(String),
    ActionFailed(String),
    Timeout { secs: u64 },
    Serde(serde_json::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for SchedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCronExpression { expr, reason } => {
                write!(f, "Invalid cron expression '{expr}': {reason}")
            }
            Self::Lock(msg) => write!(f, "Lock store error: {msg}"),
            Self::Publish(msg) => write!(f, "Publish error: {msg}"),
            Self::Queue(msg) => write!(f, "Queue dispatch error: {msg}"),
            Self::Command(msg) => write!(f, "Command error: {msg}"),
            Self::ActionFailed(msg) => write!(f, "Task action failed: {msg}"),
            Self::Timeout { secs } => write!(f, "Task timed out after {secs}s"),
            Self::Serde(e) => write!(f, "Serialization error: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for SchedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serde(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

impl From<std::io::Error> for SchedError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
