pub mod decision;
pub mod directory;
pub mod engine;
pub mod entity;
pub mod errors;
pub mod evaluation;
pub mod gates;
pub mod handle;
pub mod history;
pub mod logging;
pub mod notify;
pub mod rule;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod tracker;
pub mod workstream;
