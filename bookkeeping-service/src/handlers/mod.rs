pub mod documents;
pub mod health;
pub mod lots;
pub mod projects;
pub mod returns;

pub use documents::*;
pub use health::*;
pub use lots::*;
pub use projects::*;
pub use returns::*;
