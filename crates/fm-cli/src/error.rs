use std::error::Error as _;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] fm_engine::Error),

    #[error(transparent)]
    Infra(#[from] fm_infra::Error),

    #[error("cannot encode output: {0}")]
    Output(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

impl CliError {
    /// The message followed by every cause not already spelled out in it.
    pub fn chain(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut source = self.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if lines.last().is_none_or(|last| !last.contains(&text)) {
                lines.push(text);
            }
            source = cause.source();
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_skips_causes_already_in_message() {
        let err = CliError::from(fm_engine::Error::Discovery {
            attempts: 5,
            source: fm_infra::Error::MissingEnv("DOCKER_HOST".into()),
        });
        assert_eq!(err.chain().len(), 1);
    }
}
