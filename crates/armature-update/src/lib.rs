//! The self-updater: release catalog resolution and update application.
//!
//! Three catalog sources feed the same normalized
//! [`ReleaseInfo`](armature_core::ReleaseInfo): a JSON deploy manifest,
//! source-forge releases carrying `__upmeta__` YAML in their notes, and
//! source-forge releases described purely by tag and asset naming. The
//! updater picks the newest release for the running channel and target,
//! prefers a binary patch when one applies to the installed ordinal, and
//! hands the download to a verifying, atomically-replacing applier.

pub use self::apply::{apply, ApplyOptions, BsdiffPatcher, EcdsaVerifier, Patcher, Verifier};
pub use self::error::UpdateError;
pub use self::forge::ForgeUpdateFetcher;
pub use self::updater::Updater;

mod apply;
mod error;
mod forge;
mod updater;
