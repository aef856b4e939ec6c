pub mod client;
pub mod error;
pub mod fields;
pub mod model;

pub use client::ClickUpClient;
pub use error::ClickUpError;
pub use model::{CustomField, DropdownOption, Task, TaskStatus};
