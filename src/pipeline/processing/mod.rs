// Turning raw source records into firmographic records

pub mod currency;
pub mod duplicates;
pub mod merge;
pub mod precedence;
pub mod validate;
