//! Positive-path integration checks for every sub-command.

mod util;
use util::{gallery, promptdex};

use predicates::{prelude::*, str};
use serde_json::Value;
use tempfile::tempdir;

fn json_stdout(cmd: &mut assert_cmd::Command) -> Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).expect("stdout is JSON")
}

/* ─────────────────────────── INIT / SCAN ───────────────────────── */

#[test]
fn init_creates_the_index() {
    let tmp = tempdir().unwrap();
    promptdex(&tmp)
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(str::contains("Index ready at"));
    assert!(tmp.path().join("index.db").exists());
}

#[test]
fn scan_twice_indexes_once() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);

    promptdex(&tmp)
        .args(["scan", dir.to_str().unwrap()])
        .assert()
        .success()
        .stdout(str::contains("Indexed 3 new image(s)"));

    let report = json_stdout(promptdex(&tmp).args(["--format", "json", "scan", dir.to_str().unwrap()]));
    assert_eq!(report["indexed"], 0);
    assert_eq!(report["removed"], 0);
}

/* ─────────────────────────── SEARCH ───────────────────────────── */

#[test]
fn search_filters_and_sorts() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);
    promptdex(&tmp).args(["scan", dir.to_str().unwrap()]).assert().success();

    promptdex(&tmp)
        .args(["search", "cyberpunk"])
        .assert()
        .success()
        .stdout(
            str::contains("street.png")
                .and(str::contains("alley.png"))
                .and(str::contains("sailor.png").not()),
        );

    let page = json_stdout(promptdex(&tmp).args([
        "--format", "json", "search", "--model", "sdxl_base", "--sort", "name_asc",
    ]));
    assert_eq!(page["total"], 2);
    let names: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["file_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["sailor.png", "street.png"]);

    let page = json_stdout(promptdex(&tmp).args([
        "--format", "json", "search", "--lora", "neon", "--page-size", "1",
    ]));
    assert_eq!(page["total"], 1);
    assert_eq!(page["has_more"], false);
}

#[test]
fn search_pages_do_not_overlap() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);
    promptdex(&tmp).args(["scan", dir.to_str().unwrap()]).assert().success();

    let mut seen = Vec::new();
    for page in 1..=3 {
        let p = json_stdout(promptdex(&tmp).args([
            "--format",
            "json",
            "search",
            "--page",
            &page.to_string(),
            "--page-size",
            "1",
        ]));
        assert_eq!(p["has_more"], page < 3);
        seen.push(p["items"][0]["path"].as_str().unwrap().to_string());
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);
}

/* ─────────────────────────── SHOW / FACETS / RM ──────────────── */

#[test]
fn show_prints_the_record() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);
    let street = dir.join("street.png");

    // never scanned: parsed lazily
    promptdex(&tmp)
        .args(["show", street.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            str::contains("prompt:    cyberpunk street, neon rain")
                .and(str::contains("scheduler: Karras"))
                .and(str::contains("lora:      neon (0.7)")),
        );

    let rec = json_stdout(promptdex(&tmp).args(["--format", "json", "show", street.to_str().unwrap()]));
    assert_eq!(rec["model_name"], "sdxl_base");
    assert_eq!(rec["steps"], 25);
    assert_eq!(rec["tool"], "A1111");
}

#[test]
fn facets_cascade_on_model() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);
    promptdex(&tmp).args(["scan", dir.to_str().unwrap()]).assert().success();

    let all = json_stdout(promptdex(&tmp).args(["--format", "json", "facets"]));
    assert_eq!(all["models"][0]["value"], "sdxl_base");
    assert_eq!(all["models"][0]["count"], 2);

    let scoped = json_stdout(promptdex(&tmp).args(["--format", "json", "facets", "--model", "dreamshaper"]));
    assert_eq!(scoped["loras"].as_array().unwrap().len(), 0);
    // the models facet ignores its own filter
    assert_eq!(scoped["models"].as_array().unwrap().len(), 2);

    promptdex(&tmp)
        .arg("facets")
        .assert()
        .success()
        .stdout(str::contains("samplers:").and(str::contains("DPM++ 2M")));
}

#[test]
fn rm_drops_rows_but_not_files() {
    let tmp = tempdir().unwrap();
    let dir = gallery(&tmp);
    promptdex(&tmp).args(["scan", dir.to_str().unwrap()]).assert().success();
    let sailor = dir.join("sailor.png");

    promptdex(&tmp)
        .args(["rm", sailor.to_str().unwrap()])
        .assert()
        .success()
        .stdout(str::contains("Removed 1 image(s)"));
    assert!(sailor.exists());

    let page = json_stdout(promptdex(&tmp).args(["--format", "json", "search", "sailor"]));
    assert_eq!(page["total"], 0);
}

#[test]
fn completions_are_generated() {
    let tmp = tempdir().unwrap();
    promptdex(&tmp)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(str::contains("promptdex"));
}
