pub mod db;
pub mod kafka;
