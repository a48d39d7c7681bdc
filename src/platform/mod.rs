pub mod indicator;
pub mod printer;
pub mod trigger;
