pub mod config;
pub mod db;
pub mod driver;
pub mod logging;
pub mod prompt;
pub mod segmenter;
