pub mod account_index;
pub mod db_utils;
