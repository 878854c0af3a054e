//! End-to-end calls between the client and an in-process agent.
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::fs;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use waterfall::{Client, Connector, Error, ErrorCode, Stdio};
use waterfall_agent::{Agent, AgentConfig};

/// Serves every connection with `agent` over an in-memory stream.
struct InProcess {
    agent: Agent,
}

impl Connector for InProcess {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (client, device) = tokio::io::duplex(64 * 1024);
        let agent = self.agent.clone();
        tokio::spawn(async move {
            let _ = agent.serve_connection(device).await;
        });
        Ok(client)
    }
}

fn client_with(config: AgentConfig) -> Client<InProcess> {
    Client::new(InProcess {
        agent: Agent::new(config),
    })
}

fn client() -> Client<InProcess> {
    client_with(AgentConfig::default())
}

/// Three levels deep, with empty directories and a multi-chunk file.
fn make_tree(root: &Path) {
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::create_dir_all(root.join("a/also-empty")).unwrap();
    fs::write(root.join("top.txt"), b"top").unwrap();
    fs::write(root.join("a/one.txt"), b"one").unwrap();
    fs::write(root.join("a/b/two.bin"), vec![42u8; 300_000]).unwrap();
    fs::write(root.join("a/b/c/three.txt"), b"three").unwrap();
}

fn assert_same_tree(expected: &Path, actual: &Path) {
    for entry in fs::read_dir(expected).unwrap() {
        let entry = entry.unwrap();
        let other = actual.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            assert!(other.is_dir(), "missing dir {}", other.display());
            assert_same_tree(&entry.path(), &other);
        } else {
            assert_eq!(
                fs::read(entry.path()).unwrap(),
                fs::read(&other).unwrap(),
                "content differs for {}",
                other.display()
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn echo_roundtrips() {
    let client = client();
    let payload: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 255) as u8).collect();
    assert_eq!(client.echo(&payload).await.unwrap(), payload);
    assert!(client.echo(b"").await.unwrap().is_empty());
    assert_eq!(client.echo(b"ping").await.unwrap(), b"ping");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_then_pull_preserves_tree() {
    let host = tempfile::tempdir().unwrap();
    let device = tempfile::tempdir().unwrap();
    let back = tempfile::tempdir().unwrap();
    let src = host.path().join("tree");
    make_tree(&src);

    let client = client();
    let device_dir = device.path().to_str().unwrap();
    client.push(&src, device_dir).await.unwrap();
    assert_same_tree(&src, &device.path().join("tree"));
    assert!(device.path().join("tree/empty").is_dir());

    let pushed = device.path().join("tree");
    client
        .pull(pushed.to_str().unwrap(), back.path())
        .await
        .unwrap();
    assert_same_tree(&src, &back.path().join("tree"));
    assert!(back.path().join("tree/a/also-empty").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_bytes_then_pull_bytes() {
    let device = tempfile::tempdir().unwrap();
    let target = device.path().join("settings.conf");
    let contents = b"adb_enabled=1\n".repeat(10_000);

    let client = client();
    client
        .push_bytes(&contents, target.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(fs::read(&target).unwrap(), contents);

    let mut out = Vec::new();
    let n = client
        .pull_bytes(&mut out, target.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(n, contents.len() as u64);
    assert_eq!(out, contents);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pull_of_missing_path_is_not_found() {
    let device = tempfile::tempdir().unwrap();
    let missing = device.path().join("nope");
    let dst = tempfile::tempdir().unwrap();

    let err = client()
        .pull(missing.to_str().unwrap(), dst.path())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref e) if e.code == ErrorCode::NotFound));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_into_unwritable_target_is_rejected() {
    let host = tempfile::tempdir().unwrap();
    let src = host.path().join("payload.txt");
    fs::write(&src, b"data").unwrap();

    let blocker = host.path().join("blocker");
    fs::write(&blocker, b"a file, not a directory").unwrap();

    let err = client()
        .push(&src, blocker.to_str().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PushRejected(ref msg) if msg.contains("blocker")));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_streams_output_and_exit_code() {
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let code = client()
        .exec(
            "sh",
            ["-c", "echo out; echo err >&2; exit 5"],
            Stdio::new().stdout(&mut out).stderr(&mut err),
        )
        .await
        .unwrap();
    assert_eq!(code, 5);
    assert_eq!(out, b"out\n");
    assert_eq!(err, b"err\n");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_pipes_stdin() {
    let input = b"line\n".repeat(20_000);
    let mut out = Vec::new();
    let stdio = Stdio::new()
        .stdin(io::Cursor::new(input.clone()))
        .stdout(&mut out);
    let code = client().exec("cat", Vec::<String>::new(), stdio).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(out, input);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_with_endless_stdin_returns_on_exit() {
    let mut out = Vec::new();
    let stdio = Stdio::new()
        .stdin(tokio::io::repeat(b'z'))
        .stdout(&mut out);
    let code = tokio::time::timeout(
        Duration::from_secs(20),
        client().exec("sh", ["-c", "head -c 3; exit 2"], stdio),
    )
    .await
    .expect("exec did not return after the process exited")
    .unwrap();
    assert_eq!(code, 2);
    assert_eq!(out, b"zzz");
}

/// Host stdin that delivers a few bytes and then breaks.
struct BrokenStdin {
    head: Option<&'static [u8]>,
}

impl AsyncRead for BrokenStdin {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.head.take() {
            Some(bytes) => {
                buf.put_slice(bytes);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::other("stdin device failed"))),
        }
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_fails_instead_of_hanging_when_host_stdin_breaks() {
    let mut out = Vec::new();
    let stdio = Stdio::new()
        .stdin(BrokenStdin { head: Some(b"abc") })
        .stdout(&mut out);
    let err = tokio::time::timeout(
        Duration::from_secs(20),
        client().exec("cat", Vec::<String>::new(), stdio),
    )
    .await
    .expect("exec kept waiting after host stdin broke")
    .unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.to_string() == "stdin device failed"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_honours_dir_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = waterfall::Cmd::new("sh")
        .args(["-c", "pwd; echo $GREETING"])
        .dir(dir.path().to_str().unwrap())
        .env(vec!["GREETING=hello".to_owned()]);

    let mut out = Vec::new();
    let code = client()
        .exec_cmd(cmd, Stdio::new().stdout(&mut out))
        .await
        .unwrap();
    assert_eq!(code, 0);
    let text = String::from_utf8(out).unwrap();
    let name = dir.path().file_name().unwrap().to_str().unwrap();
    assert!(text.lines().next().unwrap().ends_with(name), "{text}");
    assert!(text.ends_with("hello\n"), "{text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_of_missing_program_fails_remotely() {
    let err = client()
        .exec("/definitely/not/here", Vec::<String>::new(), Stdio::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref e) if e.code == ErrorCode::NotFound));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn install_runs_configured_installer() {
    let host = tempfile::tempdir().unwrap();
    let apk = host.path().join("app.apk");
    fs::write(&apk, vec![7u8; 200_000]).unwrap();

    let installer = [
        "sh",
        "-c",
        r#"test "$(wc -c < "$2")" -eq 200000 && echo "Success $1""#,
        "installer",
    ];
    let client = client_with(AgentConfig::default().installer(installer));
    let file = tokio::fs::File::open(&apk).await.unwrap();
    let output = client.install(file, ["-r"]).await.unwrap();
    assert_eq!(output, "Success -r\n");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn install_failure_reports_code_and_output() {
    let host = tempfile::tempdir().unwrap();
    let apk = host.path().join("broken.apk");
    fs::write(&apk, b"not a package").unwrap();

    let client = client_with(AgentConfig::default().installer(["sh", "-c", "echo boom; exit 7"]));
    let file = tokio::fs::File::open(&apk).await.unwrap();
    let err = client.install(file, Vec::<String>::new()).await.unwrap_err();

    assert!(matches!(err, Error::InstallFailed { code: 7, .. }));
    let message = err.to_string();
    assert!(message.contains('7') && message.contains("boom"), "{message}");
}
