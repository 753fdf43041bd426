pub mod analysis;
pub mod app;
pub mod audio;
pub mod catalog;
pub mod changes;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod navigation;
pub mod player;
pub mod reconcile;
pub mod stop;
pub mod store;
pub mod ui;
pub mod visual;
