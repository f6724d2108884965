pub mod document;
pub mod lot;
pub mod project;
pub mod return_transaction;

pub use document::{
    document_total, line_amount, Document, DocumentClass, LineItem, LineKind, MAX_AMOUNT,
};
pub use lot::Lot;
pub use project::{ChildRef, ParentRef, Project, Subtask, Task};
pub use return_transaction::{ReturnProductLine, ReturnServiceLine, ReturnTransaction};
