pub mod case;
pub mod export;
