pub mod chat;
pub mod conversation;
pub mod extract;
pub mod lifecycle;
pub mod prompt;
pub mod render;

#[cfg(test)]
pub(crate) mod testing;
