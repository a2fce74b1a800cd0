// libpromptdex/src/utils_tests.rs

use super::utils::{
    file_name_of, folder_of, is_database_artifact, is_image_path, normalize_path, to_db_path,
};
use std::path::PathBuf;

#[test]
fn normalize_converts_backslashes() {
    assert_eq!(normalize_path(r"C:\imgs\sub\a.png"), "C:/imgs/sub/a.png");
}

#[test]
fn normalize_is_idempotent() {
    let samples = [
        r"C:\imgs\\sub\a.png",
        "/home/u//pics/",
        r"\\server\share\x.jpg",
        r"\\?\C:\long\path.webp",
        "relative/dir/",
        "/",
        "",
        "////",
    ];
    for s in samples {
        let once = normalize_path(s);
        assert_eq!(normalize_path(&once), once, "not idempotent for {s:?}");
    }
}

#[test]
fn normalize_is_slash_direction_invariant() {
    let fwd = "/data/out/2024/img.png";
    let back = r"\data\out\2024\img.png";
    let mixed = r"/data\out/2024\img.png";
    assert_eq!(normalize_path(fwd), normalize_path(back));
    assert_eq!(normalize_path(fwd), normalize_path(mixed));
}

#[test]
fn normalize_keeps_unc_prefix_and_root() {
    assert_eq!(normalize_path(r"\\nas\share\a.png"), "//nas/share/a.png");
    assert_eq!(normalize_path("/"), "/");
    assert_eq!(normalize_path(r"\\?\D:\x\y.png"), "D:/x/y.png");
}

#[test]
fn to_db_path_accepts_pathbuf() {
    let p = PathBuf::from("a").join("b").join("c.png");
    assert_eq!(to_db_path(&p), "a/b/c.png");
}

#[test]
fn name_and_folder_helpers() {
    assert_eq!(file_name_of("/x/y/z.png"), "z.png");
    assert_eq!(folder_of("/x/y/z.png"), "/x/y");
    assert_eq!(folder_of("/z.png"), "/");
    assert_eq!(folder_of("z.png"), "");
}

#[test]
fn extension_filters() {
    assert!(is_image_path("a.PNG"));
    assert!(is_image_path("dir/b.jpeg"));
    assert!(is_image_path("c.webp"));
    assert!(!is_image_path("d.gif"));
    assert!(!is_image_path("noext"));

    assert!(is_database_artifact("index.db"));
    assert!(is_database_artifact("index.db-wal"));
    assert!(is_database_artifact("index.db-shm"));
    assert!(!is_database_artifact("image.png"));
}
