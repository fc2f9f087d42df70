//! Integration tests for `dvm create`
//!
//! Every test runs against its own scratch state directory and passes
//! `--force-root` so results do not depend on the invoking user.

use color_eyre::Result;
use linkme::distributed_slice;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;

use crate::{integration_test, TestPlatform};

fn test_create_appvm_defaults() -> Result<()> {
    let platform = TestPlatform::new()?;
    platform
        .create(&["--label", "red", "-p", "memory=400", "work"])?
        .assert_success("create work");

    let state = platform.state()?;
    let work = &state["domains"]["work"];
    assert_eq!(work["class"], "AppVM");
    assert_eq!(work["label"], "red");
    assert_eq!(work["properties"]["memory"], "400");
    for volume in ["root", "private", "volatile"] {
        assert_eq!(work["volumes"][volume]["pool"], "default");
        let path = platform
            .state_dir
            .join("pools/default/work")
            .join(format!("{volume}.img"));
        let meta = std::fs::metadata(&path)?;
        assert_eq!(meta.len(), work["volumes"][volume]["size"].as_u64().unwrap());
    }
    Ok(())
}
integration_test!(test_create_appvm_defaults);

fn test_create_move_root() -> Result<()> {
    let platform = TestPlatform::new()?;
    let source = platform.root.join("root.img");
    std::fs::write(&source, b"a tiny root filesystem")?;

    platform
        .create(&["-C", "StandaloneVM", "-l", "green", "-R", source.as_str(), "alone"])?
        .assert_success("create alone");

    assert!(!source.exists());
    let root = platform.state_dir.join("pools/default/alone/root.img");
    assert_eq!(std::fs::read(&root)?, b"a tiny root filesystem");
    assert_eq!(platform.state()?["domains"]["alone"]["class"], "StandaloneVM");
    Ok(())
}
integration_test!(test_create_move_root);

fn test_create_copy_root_sparse() -> Result<()> {
    let platform = TestPlatform::new()?;
    let source = platform.root.join("root.img");
    let len = 32 * 1024 * 1024u64;
    {
        let mut f = std::fs::File::create(&source)?;
        f.set_len(len)?;
        f.write_all(b"boot sector")?;
        f.seek(SeekFrom::Start(len / 2))?;
        f.write_all(b"middle")?;
    }

    platform
        .create(&["-C", "TemplateVM", "-l", "black", "-r", source.as_str(), "fedora"])?
        .assert_success("create fedora");

    let root = platform.state_dir.join("pools/default/fedora/root.img");
    assert_eq!(std::fs::read(&root)?, std::fs::read(&source)?);
    let meta = std::fs::metadata(&root)?;
    assert_eq!(meta.len(), len);
    assert!(meta.blocks() * 512 < len / 4, "copy is not sparse");
    Ok(())
}
integration_test!(test_create_copy_root_sparse);

fn test_create_from_template() -> Result<()> {
    let platform = TestPlatform::new()?;
    platform
        .create(&["-C", "TemplateVM", "-l", "black", "fedora"])?
        .assert_success("create fedora");
    platform
        .create(&["-t", "fedora", "-l", "blue", "work"])?
        .assert_success("create work");

    let state = platform.state()?;
    let work = &state["domains"]["work"];
    assert_eq!(work["template"], "fedora");
    assert_eq!(work["volumes"]["root"]["from_template"], true);
    assert!(state["domains"]["fedora"].is_object());
    Ok(())
}
integration_test!(test_create_from_template);

fn test_create_unknown_label() -> Result<()> {
    let platform = TestPlatform::new()?;
    let output = platform.create(&["-l", "mauve", "work"])?;
    output.assert_failure("unknown label");
    assert!(output.stderr.contains("no such label: \"mauve\""), "{}", output.stderr);
    assert!(output.stderr.contains("\"purple\""), "{}", output.stderr);
    assert!(!platform.state_file().exists());
    assert!(!platform.state_dir.join("pools").exists());
    Ok(())
}
integration_test!(test_create_unknown_label);

fn test_create_missing_label() -> Result<()> {
    let platform = TestPlatform::new()?;
    let output = platform.create(&["work"])?;
    output.assert_failure("missing label");
    assert!(output.stderr.contains("--label option is mandatory"), "{}", output.stderr);
    assert!(!platform.state_file().exists());
    Ok(())
}
integration_test!(test_create_missing_label);

fn test_create_copy_and_move_conflict() -> Result<()> {
    let platform = TestPlatform::new()?;
    let source = platform.root.join("root.img");
    std::fs::write(&source, b"image")?;
    let output = platform.create(&[
        "-l",
        "red",
        "--root-copy-from",
        source.as_str(),
        "--root-move-from",
        source.as_str(),
        "work",
    ])?;
    output.assert_failure("copy and move");
    assert!(source.exists());
    assert!(!platform.state_file().exists());
    Ok(())
}
integration_test!(test_create_copy_and_move_conflict);

fn test_create_template_on_standalone() -> Result<()> {
    let platform = TestPlatform::new()?;
    let output = platform.create(&["-C", "StandaloneVM", "-t", "foo", "-l", "red", "work"])?;
    output.assert_failure("template on StandaloneVM");
    assert!(
        output.stderr.contains("does not support property \"template\""),
        "{}",
        output.stderr
    );
    assert!(!platform.state_file().exists());
    Ok(())
}
integration_test!(test_create_template_on_standalone);

fn test_create_duplicate_name() -> Result<()> {
    let platform = TestPlatform::new()?;
    platform
        .create(&["-l", "red", "work"])?
        .assert_success("first create");
    let before = platform.state()?;

    let output = platform.create(&["-l", "blue", "work"])?;
    output.assert_failure("second create");
    assert!(output.stderr.contains("already exists"), "{}", output.stderr);
    assert_eq!(platform.state()?, before);
    Ok(())
}
integration_test!(test_create_duplicate_name);

fn test_create_bad_pool_token() -> Result<()> {
    let platform = TestPlatform::new()?;
    let output = platform.create(&["-l", "red", "-P", "default", "work"])?;
    output.assert_failure("malformed pool");
    assert!(output.stderr.contains("pool_name:volume_name"), "{}", output.stderr);

    let output = platform.create(&["-l", "red", "-P", "nvme:private", "work"])?;
    output.assert_failure("unknown pool");
    assert!(output.stderr.contains("no such pool"), "{}", output.stderr);
    assert!(!platform.state_file().exists());
    Ok(())
}
integration_test!(test_create_bad_pool_token);

fn test_create_no_root() -> Result<()> {
    let platform = TestPlatform::new()?;
    platform
        .create(&["--no-root", "-l", "red", "work"])?
        .assert_success("create --no-root");
    assert!(platform.state()?["domains"]["work"].is_object());
    assert!(!platform.state_dir.join("pools/default/work").exists());
    Ok(())
}
integration_test!(test_create_no_root);
