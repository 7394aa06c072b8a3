use std::sync::LazyLock;

use crate::build_info::BuildInfo;
use crate::build_info::BUILD_INFO;

/// Version reported by `--version`, e.g. `0.1.0-3f2c9ab-dirty`
pub static VERSION: LazyLock<String> =
    LazyLock::new(|| format_version(env!("IMAGE_VERSION"), &BUILD_INFO));

fn format_version(release: &str, build: &BuildInfo) -> String {
    let sha = build
        .commit_sha1
        .map(|sha| sha.get(..7).unwrap_or(sha))
        .unwrap_or("unknown");
    let dirty = if build.git_dirty { "-dirty" } else { "" };
    format!("{release}-{sha}{dirty}")
}
