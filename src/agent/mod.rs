pub mod action;
pub mod engine;
pub mod events;
pub mod extract;
pub mod history;
pub mod loop_control;
pub mod repair;
pub mod session;
pub mod text_filter;
