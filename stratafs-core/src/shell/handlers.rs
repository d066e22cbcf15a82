//! FS-native command implementations.
//!
//! Every handler works purely through the FS facade; none touches a real
//! operating-system process. Failures become exit codes and stderr text,
//! never crate-level errors.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};

use stratafs_model::{FsResult, Inode, R_OK, W_OK, X_OK, mode_string};

use crate::fs::{MkdirOptions, RmOptions, StrataFs, WriteFlag, WriteOptions};
use crate::path;
use crate::shell::parser::ParsedCommand;
use crate::time::now_ms;

/// 180 days in milliseconds: the `ls -l` recent-date cutoff.
const RECENT_WINDOW_MS: i64 = 180 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HandlerResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl HandlerResult {
    fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }
}

pub(crate) struct ShellCtx<'a> {
    pub fs: &'a StrataFs,
    pub cwd: &'a mut String,
    pub env: &'a mut HashMap<String, String>,
}

impl ShellCtx<'_> {
    fn abs(&self, arg: &str) -> String {
        absolutize(self.cwd, arg)
    }
}

fn absolutize(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        arg.to_string()
    } else {
        path::join(cwd, arg)
    }
}

pub(crate) async fn run(
    ctx: &mut ShellCtx<'_>,
    cmd: &ParsedCommand,
    stdin: String,
) -> HandlerResult {
    match cmd.command.as_str() {
        "cat" => cat(ctx, cmd, stdin).await,
        "ls" => ls(ctx, cmd).await,
        "mkdir" => mkdir(ctx, cmd).await,
        "rm" => rm(ctx, cmd).await,
        "rmdir" => rmdir(ctx, cmd).await,
        "cp" => cp(ctx, cmd).await,
        "mv" => mv(ctx, cmd).await,
        "touch" => touch(ctx, cmd).await,
        "pwd" => HandlerResult::success(format!("{}\n", ctx.cwd)),
        "cd" => cd(ctx, cmd).await,
        "echo" => echo(cmd),
        "head" => head_tail(ctx, cmd, stdin, false).await,
        "tail" => head_tail(ctx, cmd, stdin, true).await,
        "wc" => wc(ctx, cmd, stdin).await,
        "stat" => stat(ctx, cmd).await,
        "chmod" => chmod(ctx, cmd).await,
        "chown" => chown(ctx, cmd).await,
        "ln" => ln(ctx, cmd).await,
        "readlink" => readlink(ctx, cmd).await,
        "realpath" => realpath(ctx, cmd).await,
        "basename" => basename_cmd(cmd),
        "dirname" => dirname_cmd(cmd),
        "test" | "[" => test_cmd(ctx, cmd).await,
        "true" => HandlerResult::exit(0),
        "false" => HandlerResult::exit(1),
        other => HandlerResult::failure(127, format!("command not found: {other}\n")),
    }
}

// ----------------------------------------------------------------------
// cat / echo / head / tail / wc
// ----------------------------------------------------------------------

async fn cat(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand, stdin: String) -> HandlerResult {
    let mut out = String::new();
    if cmd.args.is_empty() {
        out = stdin;
    } else {
        for file in &cmd.args {
            match ctx.fs.read_to_string(&ctx.abs(file)).await {
                Ok(contents) => out.push_str(&contents),
                Err(err) => return HandlerResult::failure(1, format!("cat: {err}\n")),
            }
        }
    }

    if cmd.flag("n") && !out.is_empty() {
        let had_newline = out.ends_with('\n');
        let body = if had_newline {
            &out[..out.len() - 1]
        } else {
            out.as_str()
        };
        let mut numbered = String::with_capacity(out.len() + 16);
        for (i, line) in body.split('\n').enumerate() {
            numbered.push_str(&format!("{:>6}  {line}\n", i + 1));
        }
        if !had_newline {
            numbered.pop();
        }
        out = numbered;
    }
    HandlerResult::success(out)
}

fn echo(cmd: &ParsedCommand) -> HandlerResult {
    let mut out = cmd.args.join(" ");
    if !cmd.flag("n") {
        out.push('\n');
    }
    HandlerResult::success(out)
}

async fn head_tail(
    ctx: &mut ShellCtx<'_>,
    cmd: &ParsedCommand,
    stdin: String,
    from_tail: bool,
) -> HandlerResult {
    let name = if from_tail { "tail" } else { "head" };
    let count = match cmd.flag_value("n") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                return HandlerResult::failure(1, format!("{name}: invalid line count: {raw}\n"));
            }
        },
        None => 10,
    };

    if cmd.args.is_empty() {
        return HandlerResult::success(take_lines(&stdin, count, from_tail));
    }

    let mut out = String::new();
    let multi = cmd.args.len() > 1;
    for (i, file) in cmd.args.iter().enumerate() {
        let contents = match ctx.fs.read_to_string(&ctx.abs(file)).await {
            Ok(contents) => contents,
            Err(err) => return HandlerResult::failure(1, format!("{name}: {err}\n")),
        };
        if multi {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("==> {file} <==\n"));
        }
        out.push_str(&take_lines(&contents, count, from_tail));
    }
    HandlerResult::success(out)
}

/// Strip one trailing newline, split, select, re-append one newline.
fn take_lines(text: &str, count: usize, from_tail: bool) -> String {
    if count == 0 || text.is_empty() {
        return String::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    let lines: Vec<&str> = body.split('\n').collect();
    let selected: Vec<&str> = if from_tail {
        lines[lines.len().saturating_sub(count)..].to_vec()
    } else {
        lines[..count.min(lines.len())].to_vec()
    };
    let mut out = selected.join("\n");
    out.push('\n');
    out
}

async fn wc(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand, stdin: String) -> HandlerResult {
    let want_lines = cmd.flag("l");
    let want_words = cmd.flag("w");
    let want_bytes = cmd.flag("c");
    let want_chars = cmd.flag("m");
    let all = !(want_lines || want_words || want_bytes || want_chars);

    let mut out = String::new();
    let inputs: Vec<(String, Option<String>)> = if cmd.args.is_empty() {
        vec![(stdin, None)]
    } else {
        let mut collected = Vec::new();
        for file in &cmd.args {
            match ctx.fs.read_to_string(&ctx.abs(file)).await {
                Ok(contents) => collected.push((contents, Some(file.clone()))),
                Err(err) => return HandlerResult::failure(1, format!("wc: {err}\n")),
            }
        }
        collected
    };

    for (contents, label) in &inputs {
        let lines = contents.matches('\n').count();
        let words = contents.split_whitespace().count();
        let bytes = contents.len();
        let chars = contents.chars().count();

        let mut columns = Vec::new();
        if all || want_lines {
            columns.push(lines);
        }
        if all || want_words {
            columns.push(words);
        }
        if all || want_bytes {
            columns.push(bytes);
        }
        if all || want_chars {
            columns.push(chars);
        }
        for value in &columns {
            out.push_str(&format!("{value:>8}"));
        }
        if let Some(label) = label {
            out.push_str(&format!(" {label}"));
        }
        out.push('\n');
    }
    HandlerResult::success(out)
}

// ----------------------------------------------------------------------
// ls / stat
// ----------------------------------------------------------------------

async fn ls(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let show_hidden = cmd.flag("a");
    let long = cmd.flag("l");
    let human = cmd.flag("h");
    let recursive = cmd.flag("R");

    let targets: Vec<String> = if cmd.args.is_empty() {
        vec![ctx.cwd.clone()]
    } else {
        cmd.args.iter().map(|a| ctx.abs(a)).collect()
    };

    let mut sections: Vec<(Option<String>, Vec<Inode>)> = Vec::new();
    for target in &targets {
        let inode = match ctx.fs.stat(target).await {
            Ok(inode) => inode,
            Err(err) => return HandlerResult::failure(1, format!("ls: {err}\n")),
        };
        if !inode.is_dir() {
            sections.push((None, vec![inode]));
            continue;
        }

        let mut queue = vec![inode.path.clone()];
        while let Some(dir) = queue.pop() {
            let children = match list_dir(ctx.fs, &dir, show_hidden).await {
                Ok(children) => children,
                Err(err) => return HandlerResult::failure(1, format!("ls: {err}\n")),
            };
            if recursive {
                for child in children.iter().rev() {
                    if child.is_dir() {
                        queue.push(child.path.clone());
                    }
                }
            }
            let header = (recursive || targets.len() > 1).then(|| dir.clone());
            sections.push((header, children));
            if !recursive {
                break;
            }
        }
    }

    let mut out = String::new();
    for (i, (header, entries)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if let Some(header) = header {
            out.push_str(&format!("{header}:\n"));
        }
        if long {
            for inode in entries {
                out.push_str(&long_line(inode, human));
                out.push('\n');
            }
        } else {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            if !names.is_empty() {
                out.push_str(&names.join(" "));
                out.push('\n');
            }
        }
    }
    HandlerResult::success(out)
}

async fn list_dir(fs: &StrataFs, dir: &str, show_hidden: bool) -> FsResult<Vec<Inode>> {
    let inode = fs.stat(dir).await?;
    let children = fs.catalog().list_children(inode.id).await?;
    Ok(children
        .into_iter()
        .filter(|c| show_hidden || !c.name.starts_with('.'))
        .collect())
}

fn long_line(inode: &Inode, human: bool) -> String {
    let size = if human {
        human_size(inode.size)
    } else {
        inode.size.to_string()
    };
    format!(
        "{} {:>2} {:>5} {:>5} {:>8} {} {}",
        mode_string(inode.kind, inode.mode),
        inode.nlink,
        inode.uid,
        inode.gid,
        size,
        ls_date(inode.mtime),
        inode.name,
    )
}

/// `Mon DD HH:MM` within the last 180 days, `Mon DD  YYYY` otherwise.
fn ls_date(mtime_ms: i64) -> String {
    let when = Utc
        .timestamp_millis_opt(mtime_ms)
        .single()
        .unwrap_or_else(Utc::now);
    if now_ms() - mtime_ms < RECENT_WINDOW_MS {
        when.format("%b %d %H:%M").to_string()
    } else {
        when.format("%b %d  %Y").to_string()
    }
}

/// B/K/M/G/T with rounding, in the style of `ls -lh`.
fn human_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("T", 1 << 40),
        ("G", 1 << 30),
        ("M", 1 << 20),
        ("K", 1 << 10),
    ];
    for (suffix, unit) in UNITS {
        if bytes >= unit {
            let value = (bytes as f64 / unit as f64).round() as u64;
            return format!("{value}{suffix}");
        }
    }
    format!("{bytes}B")
}

async fn stat(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.is_empty() {
        return HandlerResult::failure(1, "stat: missing operand\n");
    }
    let mut out = String::new();
    for arg in &cmd.args {
        let inode = match ctx.fs.stat(&ctx.abs(arg)).await {
            Ok(inode) => inode,
            Err(err) => return HandlerResult::failure(1, format!("stat: {err}\n")),
        };
        out.push_str(&format!(
            "  File: {}\n  Size: {:<12} Kind: {}\n  Mode: (0{:o}/{})  Uid: {}  Gid: {}\n Links: {}  Tier: {}\nAccess: {}\nModify: {}\nChange: {}\n Birth: {}\n",
            inode.path,
            inode.size,
            inode.kind,
            inode.mode,
            mode_string(inode.kind, inode.mode),
            inode.uid,
            inode.gid,
            inode.nlink,
            inode.tier,
            iso_time(inode.atime),
            iso_time(inode.mtime),
            iso_time(inode.ctime),
            iso_time(inode.birthtime),
        ));
    }
    HandlerResult::success(out)
}

fn iso_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f +0000").to_string())
        .unwrap_or_else(|| format!("@{ms}"))
}

// ----------------------------------------------------------------------
// Tree mutation
// ----------------------------------------------------------------------

async fn mkdir(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.is_empty() {
        return HandlerResult::failure(1, "mkdir: missing operand\n");
    }
    let mode = match cmd.flag_value("m") {
        Some(raw) => match u32::from_str_radix(raw, 8) {
            Ok(mode) => Some(mode),
            Err(_) => {
                return HandlerResult::failure(1, format!("mkdir: invalid mode: {raw}\n"));
            }
        },
        None => None,
    };
    let opts = MkdirOptions {
        recursive: cmd.flag("p"),
        mode,
    };
    for arg in &cmd.args {
        if let Err(err) = ctx.fs.mkdir(&ctx.abs(arg), opts).await {
            return HandlerResult::failure(1, format!("mkdir: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn rm(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.is_empty() {
        return HandlerResult::failure(1, "rm: missing operand\n");
    }
    let opts = RmOptions {
        recursive: cmd.flag("r") || cmd.flag("R"),
        force: cmd.flag("f"),
    };
    for arg in &cmd.args {
        if let Err(err) = ctx.fs.rm(&ctx.abs(arg), opts).await {
            return HandlerResult::failure(1, format!("rm: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn rmdir(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.is_empty() {
        return HandlerResult::failure(1, "rmdir: missing operand\n");
    }
    for arg in &cmd.args {
        if let Err(err) = ctx.fs.rmdir(&ctx.abs(arg), false).await {
            return HandlerResult::failure(1, format!("rmdir: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn cp(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.len() < 2 {
        return HandlerResult::failure(1, "cp: missing destination\n");
    }
    let recursive = cmd.flag("r") || cmd.flag("R");
    let dest = ctx.abs(cmd.args.last().expect("len checked"));
    let sources = &cmd.args[..cmd.args.len() - 1];

    let dest_is_dir = matches!(ctx.fs.stat(&dest).await, Ok(inode) if inode.is_dir());
    if sources.len() > 1 && !dest_is_dir {
        return HandlerResult::failure(1, format!("cp: {dest} is not a directory\n"));
    }

    for src_arg in sources {
        let src = ctx.abs(src_arg);
        let target = if dest_is_dir {
            path::join(&dest, path::basename(&src))
        } else {
            dest.clone()
        };

        let src_inode = match ctx.fs.stat(&src).await {
            Ok(inode) => inode,
            Err(err) => return HandlerResult::failure(1, format!("cp: {err}\n")),
        };
        let result = if src_inode.is_dir() {
            if !recursive {
                return HandlerResult::failure(
                    1,
                    format!("cp: -r not specified; omitting directory {src}\n"),
                );
            }
            copy_tree(ctx.fs, &src, &target).await
        } else {
            ctx.fs.copy_file(&src, &target, false).await
        };
        if let Err(err) = result {
            return HandlerResult::failure(1, format!("cp: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

/// Iterative subtree copy; directories first, then files.
async fn copy_tree(fs: &StrataFs, src_root: &str, dst_root: &str) -> FsResult<()> {
    fs.mkdir(
        dst_root,
        MkdirOptions {
            recursive: true,
            mode: None,
        },
    )
    .await?;
    let mut stack = vec![(src_root.to_string(), dst_root.to_string())];
    while let Some((src, dst)) = stack.pop() {
        for entry in fs.read_dir_entries(&src).await? {
            let child_src = path::join(&src, &entry.name);
            let child_dst = path::join(&dst, &entry.name);
            if entry.is_dir() {
                fs.mkdir(
                    &child_dst,
                    MkdirOptions {
                        recursive: false,
                        mode: None,
                    },
                )
                .await?;
                stack.push((child_src, child_dst));
            } else {
                fs.copy_file(&child_src, &child_dst, false).await?;
            }
        }
    }
    Ok(())
}

async fn mv(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.len() < 2 {
        return HandlerResult::failure(1, "mv: missing destination\n");
    }
    let force = cmd.flag("f");
    let dest = ctx.abs(cmd.args.last().expect("len checked"));
    let sources = &cmd.args[..cmd.args.len() - 1];

    let dest_is_dir = matches!(ctx.fs.stat(&dest).await, Ok(inode) if inode.is_dir());
    if sources.len() > 1 && !dest_is_dir {
        return HandlerResult::failure(1, format!("mv: {dest} is not a directory\n"));
    }

    for src_arg in sources {
        let src = ctx.abs(src_arg);
        let target = if dest_is_dir {
            path::join(&dest, path::basename(&src))
        } else {
            dest.clone()
        };
        if !force && src != target {
            if let Ok(true) = ctx.fs.exists(&target).await {
                return HandlerResult::failure(
                    1,
                    format!("mv: {target} exists (use -f to overwrite)\n"),
                );
            }
        }
        if let Err(err) = ctx.fs.rename(&src, &target).await {
            return HandlerResult::failure(1, format!("mv: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn touch(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.is_empty() {
        return HandlerResult::failure(1, "touch: missing operand\n");
    }
    for arg in &cmd.args {
        let target = ctx.abs(arg);
        let result = match ctx.fs.exists(&target).await {
            Ok(true) => {
                let now = now_ms();
                ctx.fs.utimes(&target, now, now).await
            }
            Ok(false) => ctx.fs.write_file(&target, b"", WriteOptions::default()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            return HandlerResult::failure(1, format!("touch: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn cd(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let target = match cmd.args.first() {
        Some(arg) => ctx.abs(arg),
        None => ctx
            .env
            .get("HOME")
            .cloned()
            .unwrap_or_else(|| "/".to_string()),
    };
    let resolved = match ctx.fs.realpath(&target).await {
        Ok(resolved) => resolved,
        Err(err) => return HandlerResult::failure(1, format!("cd: {err}\n")),
    };
    match ctx.fs.stat(&resolved).await {
        Ok(inode) if inode.is_dir() => {
            *ctx.cwd = resolved.clone();
            ctx.env.insert("PWD".to_string(), resolved);
            HandlerResult::exit(0)
        }
        Ok(_) => HandlerResult::failure(1, format!("cd: not a directory: {resolved}\n")),
        Err(err) => HandlerResult::failure(1, format!("cd: {err}\n")),
    }
}

// ----------------------------------------------------------------------
// Metadata and links
// ----------------------------------------------------------------------

async fn chmod(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let Some((raw_mode, files)) = cmd.args.split_first() else {
        return HandlerResult::failure(1, "chmod: missing operand\n");
    };
    let Ok(mode) = u32::from_str_radix(raw_mode, 8) else {
        return HandlerResult::failure(1, format!("chmod: invalid mode: {raw_mode}\n"));
    };
    if files.is_empty() {
        return HandlerResult::failure(1, "chmod: missing file operand\n");
    }

    for arg in files {
        let target = ctx.abs(arg);
        let result = if cmd.flag("R") {
            chmod_recursive(ctx.fs, &target, mode).await
        } else {
            ctx.fs.chmod(&target, mode).await
        };
        if let Err(err) = result {
            return HandlerResult::failure(1, format!("chmod: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

async fn chmod_recursive(fs: &StrataFs, root: &str, mode: u32) -> FsResult<()> {
    fs.chmod(root, mode).await?;
    if !fs.stat(root).await?.is_dir() {
        return Ok(());
    }
    for rel in fs.read_dir_recursive(root).await? {
        fs.chmod(&path::join(root, &rel), mode).await?;
    }
    Ok(())
}

async fn chown(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let Some((spec, files)) = cmd.args.split_first() else {
        return HandlerResult::failure(1, "chown: missing operand\n");
    };
    let (uid, gid) = match parse_owner_spec(spec) {
        Some(parsed) => parsed,
        None => {
            return HandlerResult::failure(1, format!("chown: invalid owner spec: {spec}\n"));
        }
    };
    if files.is_empty() {
        return HandlerResult::failure(1, "chown: missing file operand\n");
    }

    for arg in files {
        let target = ctx.abs(arg);
        let result = if cmd.flag("R") {
            chown_recursive(ctx.fs, &target, uid, gid).await
        } else {
            chown_one(ctx.fs, &target, uid, gid).await
        };
        if let Err(err) = result {
            return HandlerResult::failure(1, format!("chown: {err}\n"));
        }
    }
    HandlerResult::exit(0)
}

fn parse_owner_spec(spec: &str) -> Option<(u32, Option<u32>)> {
    match spec.split_once(':') {
        Some((uid, gid)) => Some((uid.parse().ok()?, Some(gid.parse().ok()?))),
        None => Some((spec.parse().ok()?, None)),
    }
}

async fn chown_one(fs: &StrataFs, target: &str, uid: u32, gid: Option<u32>) -> FsResult<()> {
    let gid = match gid {
        Some(gid) => gid,
        None => fs.stat(target).await?.gid,
    };
    fs.chown(target, uid, gid).await
}

async fn chown_recursive(
    fs: &StrataFs,
    root: &str,
    uid: u32,
    gid: Option<u32>,
) -> FsResult<()> {
    chown_one(fs, root, uid, gid).await?;
    if !fs.stat(root).await?.is_dir() {
        return Ok(());
    }
    for rel in fs.read_dir_recursive(root).await? {
        chown_one(fs, &path::join(root, &rel), uid, gid).await?;
    }
    Ok(())
}

async fn ln(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    if cmd.args.len() != 2 {
        return HandlerResult::failure(1, "ln: expected TARGET and LINK_NAME\n");
    }
    let target = &cmd.args[0];
    let link = ctx.abs(&cmd.args[1]);
    let result = if cmd.flag("s") {
        // Symlink targets are stored verbatim, relative or not.
        ctx.fs.symlink(target, &link).await
    } else {
        ctx.fs.link(&ctx.abs(target), &link).await
    };
    match result {
        Ok(()) => HandlerResult::exit(0),
        Err(err) => HandlerResult::failure(1, format!("ln: {err}\n")),
    }
}

async fn readlink(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let Some(arg) = cmd.args.first() else {
        return HandlerResult::failure(1, "readlink: missing operand\n");
    };
    match ctx.fs.read_link(&ctx.abs(arg)).await {
        Ok(target) => HandlerResult::success(format!("{target}\n")),
        Err(err) => HandlerResult::failure(1, format!("readlink: {err}\n")),
    }
}

async fn realpath(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let Some(arg) = cmd.args.first() else {
        return HandlerResult::failure(1, "realpath: missing operand\n");
    };
    match ctx.fs.realpath(&ctx.abs(arg)).await {
        Ok(resolved) => HandlerResult::success(format!("{resolved}\n")),
        Err(err) => HandlerResult::failure(1, format!("realpath: {err}\n")),
    }
}

fn basename_cmd(cmd: &ParsedCommand) -> HandlerResult {
    match cmd.args.first() {
        Some(arg) => HandlerResult::success(format!("{}\n", posix_basename(arg))),
        None => HandlerResult::failure(1, "basename: missing operand\n"),
    }
}

fn dirname_cmd(cmd: &ParsedCommand) -> HandlerResult {
    match cmd.args.first() {
        Some(arg) => HandlerResult::success(format!("{}\n", posix_dirname(arg))),
        None => HandlerResult::failure(1, "dirname: missing operand\n"),
    }
}

fn posix_basename(arg: &str) -> &str {
    let trimmed = arg.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn posix_dirname(arg: &str) -> &str {
    let trimmed = arg.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

// ----------------------------------------------------------------------
// test / [
// ----------------------------------------------------------------------

async fn test_cmd(ctx: &mut ShellCtx<'_>, cmd: &ParsedCommand) -> HandlerResult {
    let mut args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
    if cmd.command == "[" {
        match args.pop() {
            Some("]") => {}
            _ => return HandlerResult::failure(2, "[: missing closing ]\n"),
        }
    }
    let code = eval_test(ctx, &args).await;
    HandlerResult::exit(code)
}

async fn eval_test(ctx: &mut ShellCtx<'_>, args: &[&str]) -> i32 {
    match args {
        [] => 1,
        [value] => {
            if value.is_empty() {
                1
            } else {
                0
            }
        }
        [op, operand] => eval_unary(ctx, op, operand).await,
        [left, op, right] => eval_binary(left, op, right),
        _ => 2,
    }
}

async fn eval_unary(ctx: &mut ShellCtx<'_>, op: &str, operand: &str) -> i32 {
    match op {
        "-z" => return if operand.is_empty() { 0 } else { 1 },
        "-n" => return if operand.is_empty() { 1 } else { 0 },
        _ => {}
    }

    let target = ctx.abs(operand);
    let verdict = match op {
        "-e" => ctx.fs.exists(&target).await.unwrap_or(false),
        "-f" => matches!(ctx.fs.stat(&target).await, Ok(inode) if inode.is_file()),
        "-d" => matches!(ctx.fs.stat(&target).await, Ok(inode) if inode.is_dir()),
        "-s" => matches!(ctx.fs.stat(&target).await, Ok(inode) if inode.size > 0),
        "-r" => ctx.fs.access(&target, R_OK).await.is_ok(),
        "-w" => ctx.fs.access(&target, W_OK).await.is_ok(),
        "-x" => ctx.fs.access(&target, X_OK).await.is_ok(),
        _ => return 2,
    };
    if verdict { 0 } else { 1 }
}

fn eval_binary(left: &str, op: &str, right: &str) -> i32 {
    match op {
        "=" | "==" => return if left == right { 0 } else { 1 },
        "!=" => return if left != right { 0 } else { 1 },
        _ => {}
    }
    let (Ok(lhs), Ok(rhs)) = (left.parse::<i64>(), right.parse::<i64>()) else {
        return 2;
    };
    let verdict = match op {
        "-eq" => lhs == rhs,
        "-ne" => lhs != rhs,
        "-lt" => lhs < rhs,
        "-le" => lhs <= rhs,
        "-gt" => lhs > rhs,
        "-ge" => lhs >= rhs,
        _ => return 2,
    };
    if verdict { 0 } else { 1 }
}

pub(crate) async fn write_redirect(
    fs: &StrataFs,
    cwd: &str,
    target: &str,
    data: &str,
    append: bool,
) -> FsResult<()> {
    let flag = if append {
        WriteFlag::Append
    } else {
        WriteFlag::Overwrite
    };
    fs.write_file(
        &absolutize(cwd, target),
        data.as_bytes(),
        WriteOptions {
            flag,
            ..WriteOptions::default()
        },
    )
    .await
}

pub(crate) async fn read_redirect(fs: &StrataFs, cwd: &str, source: &str) -> FsResult<String> {
    fs.read_to_string(&absolutize(cwd, source)).await
}
