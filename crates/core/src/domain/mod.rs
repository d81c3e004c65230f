pub mod approval;
pub mod chain;
pub mod document;
pub mod ids;
pub mod level;
