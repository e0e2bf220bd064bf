pub mod labels;
pub mod printer;
pub mod repl;
