pub mod builder;
pub mod fetch;
pub mod filter;
pub mod paths;
pub mod tag;
pub mod transfer;
pub mod tree;
