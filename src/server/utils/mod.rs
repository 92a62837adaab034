pub mod encoding_utils;
pub mod page_utils;
pub mod player_utils;
pub mod proxy_utils;
