//! Dump a pool health snapshot, one record per line
//!
//! The snapshot path comes from the first argument, then
//! `CAROUSEL_SNAPSHOT_PATH`, then the default path.

use carousel::error::Result;
use carousel::pool::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CAROUSEL_SNAPSHOT_PATH").ok())
        .unwrap_or_else(|| ".carousel.snapshot".to_string());

    let store = SnapshotStore::new(path.as_str());
    for record in store.load().await? {
        println!("{}", record);
    }
    Ok(())
}
