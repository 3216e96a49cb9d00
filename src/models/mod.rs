pub mod classify_types;
pub mod element_types;
pub mod image_types;
pub mod message_types;
