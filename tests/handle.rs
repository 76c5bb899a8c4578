//! Handle adapter: blocking-style I/O over non-blocking pipes.

use std::time::{Duration, Instant};

use strand::{Handle, spawn};

#[test]
fn readable_times_out_on_silent_pipe() {
    let (mut r, _w) = Handle::pipe().unwrap();
    r.set_timeout(Some(Duration::from_millis(50)));

    let start = Instant::now();
    assert!(!r.readable());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "late: {elapsed:?}");

    // The watch and timer are gone; a timed read on the still-silent pipe
    // simply times out again with nothing read.
    let mut buf = [0u8; 4];
    assert_eq!(r.read(&mut buf).unwrap(), 0);
}

#[test]
fn read_waits_for_writer() {
    let (mut r, w) = Handle::pipe().unwrap();

    let writer = spawn(move || {
        let mut w = w;
        assert_eq!(w.write(b"ping").unwrap(), 4);
        // Dropping the handle closes the write end.
    });

    let mut buf = [0u8; 4];
    assert_eq!(r.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"ping");
    writer.join();

    // Writer gone: EOF.
    assert_eq!(r.read(&mut buf).unwrap(), 0);
}

#[test]
fn read_with_partial_flag_returns_first_chunk() {
    let (mut r, mut w) = Handle::pipe().unwrap();
    r.set_partial(true);

    assert_eq!(w.write(b"abc").unwrap(), 3);
    let mut buf = [0u8; 16];
    // Without the partial flag this would suspend waiting for 16 bytes.
    assert_eq!(r.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
}

#[test]
fn read_assembles_across_writes() {
    let (mut r, w) = Handle::pipe().unwrap();

    let writer = spawn(move || {
        let mut w = w;
        w.write(b"hel").unwrap();
        strand::cede();
        w.write(b"lo!").unwrap();
    });

    let mut buf = [0u8; 6];
    assert_eq!(r.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf, b"hello!");
    writer.join();
}

#[test]
fn readline_splits_records() {
    let (mut r, w) = Handle::pipe().unwrap();

    let writer = spawn(move || {
        let mut w = w;
        w.write(b"alpha\nbeta\ngamma").unwrap();
    });

    assert_eq!(r.readline(b"\n").unwrap(), b"alpha\n");
    assert_eq!(r.readline(b"\n").unwrap(), b"beta\n");
    writer.join();
    // EOF: the unterminated tail comes out once, then None.
    assert_eq!(r.readline(b"\n").unwrap(), b"gamma");
    assert_eq!(r.readline(b"\n"), None);
}

#[test]
fn readline_custom_terminator() {
    let (mut r, mut w) = Handle::pipe().unwrap();
    w.write(b"one\r\ntwo\r\n").unwrap();
    assert_eq!(r.readline(b"\r\n").unwrap(), b"one\r\n");
    assert_eq!(r.readline(b"\r\n").unwrap(), b"two\r\n");
}

#[test]
fn readline_timeout_keeps_partial_record() {
    let (mut r, mut w) = Handle::pipe().unwrap();
    r.set_timeout(Some(Duration::from_millis(40)));

    w.write(b"no terminator yet").unwrap();
    assert_eq!(r.readline(b"\n"), None);

    // The partial record is still buffered; completing it succeeds.
    w.write(b"\n").unwrap();
    assert_eq!(r.readline(b"\n").unwrap(), b"no terminator yet\n");
}

#[test]
fn write_resumes_after_reader_drains() {
    let (r, mut w) = Handle::pipe().unwrap();

    // Fill the pipe until the kernel buffer pushes back.
    let chunk = vec![7u8; 64 * 1024];
    let drainer = spawn(move || {
        let mut r = r;
        let mut buf = vec![0u8; 256 * 1024];
        let mut total = 0;
        while total < 256 * 1024 {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    });

    let mut sent = 0;
    for _ in 0..4 {
        sent += w.write(&chunk).unwrap();
    }
    assert_eq!(sent, 256 * 1024);
    drop(w);
    assert_eq!(
        drainer.join(),
        vec![strand::Value::Int(256 * 1024)]
    );
}

#[test]
fn handle_metadata() {
    let (mut r, _w) = Handle::pipe().unwrap();
    assert_eq!(r.timeout(), None);
    r.set_timeout(Some(Duration::from_secs(1)));
    assert_eq!(r.timeout(), Some(Duration::from_secs(1)));
    assert!(!r.partial());
    r.set_desc("pipe reader");
    assert_eq!(r.desc(), "pipe reader");
    assert!(r.as_raw_fd() >= 0);
}
