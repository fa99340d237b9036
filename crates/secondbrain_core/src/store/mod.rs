pub mod front_matter;
pub mod item_store;

pub use item_store::{
    FiledLocation, FsItemStore, ItemStore, LoadOutcome, StoreError, StoreResult, StoredItem, Zone,
};
