//! Userland programs shipped in the default image
//!
//! Each program talks to the kernel only through its [`Sys`] handle and
//! writes terminal-style `\r\n` line endings. Failures go to stderr as
//! `name: message` and turn into exit code 1.

use crate::error::KResult;
use crate::kernel::{Fd, OpenFlags, Program, Sys};

/// Every built-in program with its install name under `/usr/bin`
pub fn builtins() -> Vec<(&'static str, Program)> {
    vec![
        ("echo", echo()),
        ("cat", cat()),
        ("env", env()),
        ("ls", ls()),
    ]
}

/// Report `result` the usual way and turn it into an exit code
async fn finish(sys: &Sys, name: &str, result: KResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let message = format!("{}: {}\r\n", name, e);
            if let Err(e) = sys.write_all(Fd::STDERR, message.as_bytes()).await {
                log::warn!("{}: lost error report: {}", name, e);
            }
            1
        }
    }
}

/// echo - print the arguments separated by spaces
pub fn echo() -> Program {
    Program::new("echo", |sys, args| async move {
        let line = format!("{}\r\n", args.join(" "));
        let result = sys.print(&line).await;
        finish(&sys, "echo", result).await
    })
}

/// cat - print each file (stdin when none is named) line by line
pub fn cat() -> Program {
    Program::new("cat", |sys, args| async move {
        let result = if args.is_empty() {
            copy_lines(&sys, Fd::STDIN).await
        } else {
            cat_files(&sys, &args).await
        };
        finish(&sys, "cat", result).await
    })
}

async fn cat_files(sys: &Sys, paths: &[String]) -> KResult<()> {
    for path in paths {
        let fd = sys.open(path, OpenFlags::READ).await?;
        let copied = copy_lines(sys, fd).await;
        sys.close(fd).await?;
        copied?;
    }
    Ok(())
}

async fn copy_lines(sys: &Sys, fd: Fd) -> KResult<()> {
    loop {
        let (line, eof) = sys.get_line(fd).await?;
        if eof {
            return Ok(());
        }
        sys.print(&format!("{}\r\n", line)).await?;
    }
}

/// env - print the environment as NAME=value lines
pub fn env() -> Program {
    Program::new("env", |sys, _args| async move {
        let result = print_env(&sys).await;
        finish(&sys, "env", result).await
    })
}

async fn print_env(sys: &Sys) -> KResult<()> {
    let mut out = String::new();
    for (name, value) in sys.environ().await? {
        out.push_str(&format!("{}={}\r\n", name, value));
    }
    sys.print(&out).await
}

/// ls - list a directory (the cwd by default), one name per line
pub fn ls() -> Program {
    Program::new("ls", |sys, args| async move {
        let result = list_dir(&sys, args.first().cloned()).await;
        finish(&sys, "ls", result).await
    })
}

async fn list_dir(sys: &Sys, dir: Option<String>) -> KResult<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => sys.getcwd().await?,
    };
    let fd = sys.open(&dir, OpenFlags::READ | OpenFlags::DIR).await?;
    let entries = sys.getdents(fd).await;
    sys.close(fd).await?;
    let mut out = String::new();
    for name in entries? {
        out.push_str(&name);
        out.push_str("\r\n");
    }
    sys.print(&out).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelBuilder;

    fn run(path: &str, args: &[&str]) -> (i32, String) {
        let kernel = KernelBuilder::new().build().unwrap();
        let args = args.iter().map(|s| s.to_string()).collect();
        let pid = kernel.spawn(path, args).unwrap();
        kernel.close_console_input();
        kernel.run();
        let code = kernel.reap(pid).unwrap_or(-99);
        let out = String::from_utf8(kernel.take_console_output()).unwrap();
        (code, out)
    }

    #[test]
    fn test_builtin_names() {
        let names: Vec<_> = builtins().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["echo", "cat", "env", "ls"]);
    }

    #[test]
    fn test_echo() {
        assert_eq!(run("echo", &["hello", "world"]), (0, "hello world\r\n".into()));
        assert_eq!(run("/usr/bin/echo", &[]), (0, "\r\n".into()));
    }

    #[test]
    fn test_cat_file() {
        let (code, out) = run("cat", &["/etc/profile"]);
        assert_eq!(code, 0);
        assert_eq!(
            out,
            "\r\nexport PATH=/usr/bin:/bin\r\nexport TEST=test123\r\n"
        );
    }

    #[test]
    fn test_cat_missing_file() {
        let (code, out) = run("cat", &["/nope"]);
        assert_eq!(code, 1);
        assert!(out.starts_with("cat: /nope"));
    }

    #[test]
    fn test_cat_stdin() {
        let kernel = KernelBuilder::new().build().unwrap();
        let pid = kernel.spawn("cat", vec![]).unwrap();
        kernel.push_console_input(b"one\ntwo");
        kernel.close_console_input();
        kernel.run();
        assert_eq!(kernel.reap(pid), Some(0));
        assert_eq!(kernel.take_console_output(), b"one\r\ntwo\r\n".to_vec());
    }

    #[test]
    fn test_ls_root() {
        let (code, out) = run("ls", &["/"]);
        assert_eq!(code, 0);
        let names: Vec<_> = out.split("\r\n").filter(|s| !s.is_empty()).collect();
        assert_eq!(
            names,
            vec!["bin", "dev", "etc", "home", "proc", "root", "usr"]
        );
    }

    #[test]
    fn test_env_is_sorted() {
        let kernel = KernelBuilder::new().build().unwrap();
        let ctx = kernel.context();
        ctx.with_process_mut(|p| {
            p.env.set("B", "2", true).unwrap();
            p.env.set("A", "1", true).unwrap();
        })
        .unwrap();
        let pid = kernel.spawn("env", vec![]).unwrap();
        kernel.run();
        assert_eq!(kernel.reap(pid), Some(0));
        assert_eq!(
            kernel.take_console_output(),
            b"A=1\r\nB=2\r\nPATH=/usr/bin:/bin\r\n".to_vec()
        );
    }
}
