//! Property tests for placeholder resolution and path keys

use modsync::services::PathResolver;
use modsync::services::paths::{KOTOR_DIRECTORY_TOKEN, MOD_DIRECTORY_TOKEN, path_key};
use proptest::prelude::*;

fn root() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z0-9 _.-]{1,10}", 1..4).prop_map(|segments| format!("/{}", segments.join("/")))
}

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[A-Za-z0-9_. -]{1,12}",
        1 => Just(MOD_DIRECTORY_TOKEN.to_string()),
        1 => Just(KOTOR_DIRECTORY_TOKEN.to_string()),
        1 => Just("<<".to_string()),
        1 => Just(">>".to_string()),
    ]
}

fn instruction_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..6).prop_map(|segments| segments.join("/"))
}

proptest! {
    #[test]
    fn resolving_twice_changes_nothing(mod_root in root(), game_root in root(), path in instruction_path()) {
        let resolver = PathResolver::new(Some(&mod_root), Some(&game_root));
        let once = resolver.resolve(&path);
        let twice = resolver.resolve(&once.path);

        prop_assert!(once.complete);
        prop_assert_eq!(&twice.path, &once.path);
        prop_assert!(!once.path.contains(MOD_DIRECTORY_TOKEN));
        prop_assert!(!once.path.contains(KOTOR_DIRECTORY_TOKEN));
    }

    #[test]
    fn paths_without_tokens_are_untouched(path in "[A-Za-z0-9/\\\\ ._<>-]{0,40}") {
        prop_assume!(!path.contains(MOD_DIRECTORY_TOKEN) && !path.contains(KOTOR_DIRECTORY_TOKEN));
        let resolver = PathResolver::new(Some("/mods"), None);
        let resolved = resolver.resolve(&path);

        prop_assert_eq!(resolved.path, path);
        prop_assert!(resolved.complete);
    }

    #[test]
    fn unset_root_keeps_its_token(path in instruction_path()) {
        let resolver = PathResolver::new(Some("/mods"), None);
        let resolved = resolver.resolve(&path);

        prop_assert_eq!(resolved.complete, !path.contains(KOTOR_DIRECTORY_TOKEN));
        prop_assert_eq!(
            resolved.path.matches(KOTOR_DIRECTORY_TOKEN).count(),
            path.matches(KOTOR_DIRECTORY_TOKEN).count()
        );
    }

    #[test]
    fn unresolve_inverts_resolve(relative in "[a-z0-9_]{1,8}(/[a-z0-9_]{1,8}(\\.[a-z]{3})?){0,3}") {
        let resolver = PathResolver::new(Some("/data/mods"), Some("/games/swkotor"));
        let written = format!("{}/{}", KOTOR_DIRECTORY_TOKEN, relative);

        let resolved = resolver.resolve(&written);
        prop_assert_eq!(resolver.unresolve(&resolved.path), written);
    }

    #[test]
    fn path_key_ignores_case_and_separators(path in "[A-Za-z0-9_]{1,8}([/\\\\][A-Za-z0-9_]{1,8}){0,4}") {
        let windows = path.replace('/', "\\");
        prop_assert_eq!(path_key(&windows), path_key(&path.to_uppercase()).to_lowercase());
        prop_assert_eq!(path_key(&path), path_key(&path_key(&path)));
    }
}

#[test]
fn root_containing_token_text_is_not_expanded_again() {
    let resolver = PathResolver::new(Some("/odd/<<kotorDirectory>>"), Some("/game"));
    let resolved = resolver.resolve("<<modDirectory>>/file.tga");

    assert_eq!(resolved.path, "/odd/<<kotorDirectory>>/file.tga");
    assert!(resolved.complete);
}
