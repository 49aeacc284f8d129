//! Rule data model and its durable store.
//!
//! - `AppRules` / `ActRules` / `ViewRule`: Package → activity → ordered rules
//! - `RuleStore`: Atomic JSON persistence and import-merge
//! - `ImportSource`: Content reference for untrusted rule files
//! - `TargetApp`: Listing entry with lazily resolved label and icon

mod model;
mod source;
mod store;
mod target;

pub use model::{ActRules, AppRules, GONE, MergeReport, VISIBLE, ViewRule};
pub use source::{BytesSource, FileSource, ImportSource};
pub use store::{RuleStore, parse_import};
pub use target::{AppInfo, AppLabelResolver, IconRef, PackageNameResolver, TargetApp};
