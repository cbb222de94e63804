pub mod command;
pub mod disk;
pub mod logging;
pub mod path_resolver;
pub mod os_detection;
