pub mod registers;

pub use registers::RegisterBlock;
