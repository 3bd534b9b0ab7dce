pub mod identifier;
pub mod page_code;
pub mod scan;
