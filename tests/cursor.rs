use mixtrace::{walk_until, FrameCursor};

#[test]
fn test_frame_cursor() {
    let frames = func1();
    assert_eq!(frames.len(), 2);
    let mut names = vec![];
    for (_, pc) in &frames {
        backtrace::resolve(*pc as _, |s| {
            names.push(s.name().unwrap().as_str().unwrap().to_string());
        })
    }
    // The first record is `func2`'s own, which returns into `func1`.
    assert!(names[0].contains("func1"));
    assert!(names[1].contains("test_frame_cursor"));
    // Frame records sit at strictly increasing addresses.
    assert!(frames.windows(2).all(|w| w[0].0 < w[1].0));
}

#[inline(never)]
fn func1() -> Vec<(usize, usize)> {
    std::hint::black_box(func2())
}

#[inline(never)]
fn func2() -> Vec<(usize, usize)> {
    // Grab `func2`'s own frame record, then step outwards from it.
    let mut start = 0;
    walk_until(usize::MAX, 0, |frame| {
        start = frame.frame_pointer as usize;
        false
    });
    let mut cursor = unsafe { FrameCursor::new(start as *const _, usize::MAX) };
    let mut frames = vec![];
    while let Some(frame) = cursor.step() {
        frames.push((frame.address(), frame.return_address));
        if frames.len() == 2 {
            break;
        }
    }
    std::hint::black_box(frames)
}
