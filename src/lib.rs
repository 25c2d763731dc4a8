pub mod config;
pub mod errors;
pub mod flow;
pub mod gateway;
pub mod layout;
pub mod pipeline;
pub mod plan;
pub mod playbook;
pub mod roles;
pub mod stages;
pub mod store;
pub mod ui;
pub mod util;
pub mod verdict;
