pub mod api;
pub mod cache;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod knowledge;
pub mod notice;
pub mod panels;
pub mod render;
pub mod socketio;
pub mod status;
pub mod types;
pub mod view_model;
