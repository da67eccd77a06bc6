use thiserror::Error;

#[derive(Error, Debug)]
pub enum BreachCaseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure_kind() {
        let config = BreachCaseError::Config("DATABASE_URL is not set".into());
        assert_eq!(config.to_string(), "Configuration error: DATABASE_URL is not set");

        let validation = BreachCaseError::Validation("summary is empty".into());
        assert_eq!(validation.to_string(), "Validation error: summary is empty");
    }
}
