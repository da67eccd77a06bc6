pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{CompletionRequest, CompletionService, Message, MessageRole};
pub use util::{extract_json_payload, parse_json_payload, truncate_to_char_boundary};
