// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::DotfilesFixture;

use anyhow::Result;
use dotlink::{
    backup::BackupDir,
    config::{LinkEntry, Manifest},
    install::{InstallError, Installer, Mapping},
    link::{LinkOutcome, LinkState},
};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{env::current_dir, fs, os::unix::fs::MetadataExt, path::PathBuf};

fn full_fixture() -> Result<DotfilesFixture> {
    let fixture = DotfilesFixture::new(current_dir()?)?;
    fixture.add_dotfile("zsh/.zshrc", "export EDITOR=nvim")?;
    fixture.add_dotfile("git/.gitconfig", "[user]\n  name = John Doe")?;
    fixture.add_dotfile("ssh/config", "Host *\n  AddKeysToAgent yes")?;
    fixture.add_dotfile("claude/commands/review.md", "# Review")?;
    fixture.add_dotfile("claude/commands/rails/migrate.md", "# Migrate")?;
    Ok(fixture)
}

#[sealed_test]
fn replace_old_zshrc_and_keep_backup() -> Result<()> {
    let fixture = DotfilesFixture::new(current_dir()?)?;
    fixture.add_dotfile("zsh/.zshrc", "new config")?;
    fixture.add_home_file(".zshrc", "old config")?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default());
    let report = installer.run()?;

    let zshrc = fixture.home.join(".zshrc");
    assert_eq!(fs::read_link(&zshrc)?, fixture.repo.join("zsh/.zshrc"));
    assert_eq!(report.backed_up(), 1);

    let stamps = fs::read_dir(fixture.backup_root())?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(stamps.len(), 1);
    assert_eq!(report.backup_dir.as_ref(), Some(&stamps[0]));

    let stamp = stamps[0].file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(stamp.len(), "YYYYMMDD_HHMMSS".len());
    assert_eq!(fs::read_to_string(stamps[0].join(".zshrc"))?, "old config");

    Ok(())
}

#[sealed_test]
fn second_run_changes_nothing() -> Result<()> {
    let fixture = full_fixture()?;
    fixture.add_home_file(".gitconfig", "old gitconfig")?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default())
        .with_backup(BackupDir::new(fixture.backup_root(), "20250101_120000"));
    let first = installer.run()?;
    assert!(first.has_changes());
    assert_eq!(first.entries.len(), 5);

    let inodes = first
        .entries
        .iter()
        .map(|(mapping, _)| Ok(fs::symlink_metadata(&mapping.target)?.ino()))
        .collect::<Result<Vec<_>>>()?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default())
        .with_backup(BackupDir::new(fixture.backup_root(), "20250101_120001"));
    let second = installer.run()?;

    assert!(!second.has_changes());
    assert_eq!(second.unchanged(), 5);
    assert_eq!(second.backup_dir, None);
    assert!(!fixture.backup_root().join("20250101_120001").exists());

    let after = second
        .entries
        .iter()
        .map(|(mapping, _)| Ok(fs::symlink_metadata(&mapping.target)?.ino()))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(inodes, after);

    Ok(())
}

#[sealed_test]
fn expanded_commands_land_in_new_nested_directories() -> Result<()> {
    let fixture = full_fixture()?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default());
    installer.run()?;

    let review = fixture.home.join(".claude/commands/review.md");
    let migrate = fixture.home.join(".claude/commands/rails/migrate.md");
    assert!(fixture.home.join(".claude/commands/rails").is_dir());
    assert!(!fs::symlink_metadata(fixture.home.join(".claude/commands"))?
        .file_type()
        .is_symlink());
    assert_eq!(fs::read_link(review)?, fixture.repo.join("claude/commands/review.md"));
    assert_eq!(fs::read_to_string(migrate)?, "# Migrate");
    assert_eq!(
        fs::read_link(fixture.home.join(".ssh/config"))?,
        fixture.repo.join("ssh/config")
    );

    Ok(())
}

#[sealed_test]
fn wrong_symlink_gets_replaced() -> Result<()> {
    let fixture = full_fixture()?;
    let gitconfig = fixture.home.join(".gitconfig");
    std::os::unix::fs::symlink(fixture.repo.join("zsh/.zshrc"), &gitconfig)?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default());
    let report = installer.run()?;

    assert_eq!(report.replaced(), 1);
    assert_eq!(report.backup_dir, None);
    assert_eq!(fs::read_link(&gitconfig)?, fixture.repo.join("git/.gitconfig"));

    Ok(())
}

#[sealed_test]
fn first_failure_stops_the_run() -> Result<()> {
    let fixture = full_fixture()?;
    fixture.add_dotfile("vim/.vimrc", "set number")?;
    // A file where a directory is expected makes the nested target unreachable.
    fixture.add_home_file(".ssh", "not a directory")?;

    let manifest = Manifest {
        links: vec![
            LinkEntry::file("zsh/.zshrc", ".zshrc"),
            LinkEntry::file("ssh/config", ".ssh/config"),
            LinkEntry::file("vim/.vimrc", ".vimrc"),
        ],
        ..Manifest::empty()
    };
    let mut installer = Installer::new(&fixture.repo, &fixture.home, manifest);
    let result = installer.run();

    match result {
        Err(InstallError::Link { mapping, .. }) => assert_eq!(
            mapping,
            Mapping::new(
                fixture.repo.join("ssh/config"),
                fixture.home.join(".ssh/config")
            )
        ),
        other => panic!("expected link failure, got {other:?}"),
    }
    assert!(fs::symlink_metadata(fixture.home.join(".zshrc"))?
        .file_type()
        .is_symlink());
    assert!(fs::symlink_metadata(fixture.home.join(".vimrc")).is_err());

    Ok(())
}

#[sealed_test]
fn status_reports_without_touching_anything() -> Result<()> {
    let fixture = full_fixture()?;
    fixture.add_home_file(".zshrc", "old config")?;

    let installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default());
    let result = installer
        .status()?
        .into_iter()
        .map(|(mapping, state)| (mapping.target, state))
        .collect::<Vec<_>>();

    let expect: Vec<(PathBuf, LinkState)> = vec![
        (fixture.home.join(".zshrc"), LinkState::Occupied),
        (fixture.home.join(".gitconfig"), LinkState::Missing),
        (fixture.home.join(".ssh/config"), LinkState::Missing),
        (
            fixture.home.join(".claude/commands/rails/migrate.md"),
            LinkState::Missing,
        ),
        (
            fixture.home.join(".claude/commands/review.md"),
            LinkState::Missing,
        ),
    ];
    assert_eq!(result, expect);
    assert_eq!(fs::read_to_string(fixture.home.join(".zshrc"))?, "old config");
    assert!(!fixture.home.join(".ssh").exists());

    Ok(())
}

#[sealed_test]
fn outcomes_follow_table_order() -> Result<()> {
    let fixture = full_fixture()?;

    let mut installer = Installer::new(&fixture.repo, &fixture.home, Manifest::default());
    let report = installer.run()?;
    let targets = report
        .entries
        .iter()
        .map(|(mapping, outcome)| {
            assert_eq!(outcome, &LinkOutcome::Created);
            mapping.target.clone()
        })
        .collect::<Vec<_>>();

    assert_eq!(
        targets,
        vec![
            fixture.home.join(".zshrc"),
            fixture.home.join(".gitconfig"),
            fixture.home.join(".ssh/config"),
            fixture.home.join(".claude/commands/rails/migrate.md"),
            fixture.home.join(".claude/commands/review.md"),
        ]
    );

    Ok(())
}
