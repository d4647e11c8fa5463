//! Path-based geometry classification.

use dataset_loader_load_models::GeometryKind;

/// Suffix every loadable archive entry carries.
pub const DATA_FILE_SUFFIX: &str = ".geojson";

/// Returns `true` if `path` names a loadable data file.
#[must_use]
pub fn is_data_file(path: &str) -> bool {
    path.ends_with(DATA_FILE_SUFFIX)
}

/// Maps an archive entry path to the geometry kind it holds.
///
/// The path must end in [`DATA_FILE_SUFFIX`]; the first kind in
/// [`GeometryKind::ALL`] whose path token appears anywhere in the path wins.
/// Returns `None` for entries that should be dropped.
#[must_use]
pub fn classify_entry(path: &str) -> Option<GeometryKind> {
    if !is_data_file(path) {
        return None;
    }

    GeometryKind::ALL
        .into_iter()
        .find(|kind| path.contains(kind.path_token()))
}
