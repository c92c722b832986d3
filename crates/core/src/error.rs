#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown stage key: '{0}'")]
    UnknownStage(String),

    #[error("Unknown subtask key: '{0}'")]
    UnknownSubtask(String),
}
