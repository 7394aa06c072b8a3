use std::sync::LazyLock;

/// Git state captured at build time, absent when built outside a checkout
pub struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub git_dirty: bool,
}

pub static BUILD_INFO: LazyLock<BuildInfo> = LazyLock::new(|| BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: is_dirty(option_env!("VERGEN_GIT_DIRTY")),
});

fn is_dirty(flag: Option<&str>) -> bool {
    flag == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flag_only_set_by_true() {
        assert!(is_dirty(Some("true")));
        assert!(!is_dirty(Some("false")));
        assert!(!is_dirty(None));
    }

    #[test]
    fn build_info_is_readable_at_runtime() {
        let info = &*BUILD_INFO;
        assert_eq!(info.git_dirty, is_dirty(option_env!("VERGEN_GIT_DIRTY")));
    }
}
