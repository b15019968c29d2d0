pub mod proxy_list;
pub mod score_store;

pub use proxy_list::ProxyList;
pub use score_store::{ScoreStore, StoreReadError};
