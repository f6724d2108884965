pub mod documents;
pub mod projects;
pub mod returns;

pub use documents::*;
pub use projects::*;
pub use returns::*;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    /// False when the record was already gone.
    pub deleted: bool,
}
