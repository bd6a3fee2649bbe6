//! Output registry: handles, per-output state and event routing.

mod common;

use common::{dmabuf, guest_texture, mock, surface, Call, MockGl, MockWindow};
use gl_scanout::{Display, DisplayEvent, DrawOutcome, Error, GlVersion, ModeKind, Rect};

type MockDisplay = Display<MockWindow, MockGl>;

#[test]
fn test_register_and_unregister() {
    let mut display = MockDisplay::new();
    assert!(display.is_empty());

    let (rec, window, gl) = mock();
    let id = display.register_output(window, gl);
    assert_eq!(display.len(), 1);
    assert_eq!(display.ids().collect::<Vec<_>>(), vec![id]);

    display.switch(id, surface(640, 480)).unwrap();
    display.refresh(id, |_| {}).unwrap();
    display.create_context(id, GlVersion::new(3, 3)).unwrap();
    assert!(!rec.borrow().nothing_alive());

    display.unregister_output(id).unwrap();
    assert!(display.is_empty());
    assert!(rec.borrow().nothing_alive());

    assert!(matches!(
        display.unregister_output(id),
        Err(Error::UnknownOutput(gone)) if gone == id
    ));
}

#[test]
fn test_unknown_output_is_an_error() {
    let mut display = MockDisplay::new();
    let (_rec, window, gl) = mock();
    let id = display.register_output(window, gl);
    display.unregister_output(id).unwrap();

    assert!(matches!(display.draw(id), Err(Error::UnknownOutput(_))));
    assert!(matches!(
        display.scanout_flush(id, Rect::default()),
        Err(Error::UnknownOutput(_))
    ));
    assert!(display.output(id).is_err());
}

#[test]
fn test_outputs_keep_their_own_geometry() {
    let mut display = MockDisplay::new();
    let (_a_rec, a_window, a_gl) = mock();
    let (_b_rec, b_window, b_gl) = mock();
    let a = display.register_output(a_window, a_gl);
    let b = display.register_output(b_window, b_gl);

    display.resize(a, 1000, 600).unwrap();
    display.resize(b, 800, 1000).unwrap();
    display.switch(a, surface(640, 480)).unwrap();
    display.switch(b, surface(640, 480)).unwrap();

    let va = display.output(a).unwrap().viewport().unwrap();
    let vb = display.output(b).unwrap().viewport().unwrap();
    assert_eq!((va.offset_x, va.offset_y), (100, 0));
    assert_eq!((vb.offset_x, vb.offset_y), (0, 200));

    display.resize(a, 800, 600).unwrap();
    assert_eq!(display.output(b).unwrap().viewport(), Some(vb));
}

#[test]
fn test_events_are_tagged_with_their_output() {
    let mut display = MockDisplay::new();
    let (_a_rec, a_window, a_gl) = mock();
    let (b_rec, b_window, b_gl) = mock();
    let a = display.register_output(a_window, a_gl);
    let b = display.register_output(b_window, b_gl);

    display.switch(a, surface(320, 200)).unwrap();
    display.scanout_flush(b, Rect::new(0, 0, 1, 1)).unwrap();

    assert_eq!(
        display.poll_events(),
        vec![
            (
                a,
                DisplayEvent::ResizeWindow {
                    width: 320,
                    height: 200
                }
            ),
            (b, DisplayEvent::RedrawRequested),
        ]
    );
    assert!(display.poll_events().is_empty());

    // b scans out, a keeps presenting its surface
    display.refresh(a, |_| {}).unwrap();
    display.refresh(b, |_| {}).unwrap();
    let texture = guest_texture(&b_rec);
    display
        .scanout_texture(b, texture, false, 320, 200, Rect::new(0, 0, 320, 200))
        .unwrap();
    assert_eq!(display.output(a).unwrap().mode(), ModeKind::Surface);
    assert_eq!(display.output(b).unwrap().mode(), ModeKind::Scanout);

    assert_eq!(display.draw(a).unwrap(), DrawOutcome::Presented);
    assert_eq!(display.draw(b).unwrap(), DrawOutcome::Presented);
    assert_eq!(
        display.poll_events(),
        vec![
            (a, DisplayEvent::BufferConsumed),
            (b, DisplayEvent::BufferConsumed)
        ]
    );

    display.scanout_disable(b).unwrap();
    assert_eq!(display.output(b).unwrap().mode(), ModeKind::Surface);
}

#[test]
fn test_guest_update_hook_runs_inside_refresh() {
    let mut display = MockDisplay::new();
    let (_rec, window, gl) = mock();
    let id = display.register_output(window, gl);
    display.switch(id, surface(64, 64)).unwrap();
    display.poll_events();

    display
        .refresh(id, |output| {
            output.update(Rect::new(0, 0, 64, 8)).unwrap();
        })
        .unwrap();
    assert_eq!(display.poll_events(), vec![(id, DisplayEvent::RedrawRequested)]);

    display.draw(id).unwrap();
    assert_eq!(display.poll_events(), vec![(id, DisplayEvent::BufferConsumed)]);
}

#[test]
fn test_context_handles_route_per_output() {
    let mut display = MockDisplay::new();
    let (_a_rec, a_window, a_gl) = mock();
    let (_b_rec, b_window, b_gl) = mock();
    let a = display.register_output(a_window, a_gl);
    let b = display.register_output(b_window, b_gl);

    let ctx = display.create_context(a, GlVersion::new(3, 0)).unwrap();
    display.make_current(a, ctx).unwrap();
    assert!(matches!(
        display.make_current(b, ctx),
        Err(Error::UnknownContext(_))
    ));
    display.destroy_context(a, ctx).unwrap();
}

#[test]
fn test_dmabuf_is_imported_per_output() {
    let mut display = MockDisplay::new();
    let (a_rec, a_window, a_gl) = mock();
    let (b_rec, b_window, b_gl) = mock();
    let a = display.register_output(a_window, a_gl);
    let b = display.register_output(b_window, b_gl);
    let mut buf = dmabuf(640, 480);

    display.scanout_dmabuf(a, &mut buf).unwrap();
    display.scanout_dmabuf(b, &mut buf).unwrap();
    let a_tex = display.output(a).unwrap().imported_texture(&buf).unwrap();
    let b_tex = display.output(b).unwrap().imported_texture(&buf).unwrap();
    assert!(a_rec.borrow().textures.contains(&a_tex));
    assert!(b_rec.borrow().textures.contains(&b_tex));
    assert_eq!(display.output(b).unwrap().guest_framebuffer().unwrap().texture, b_tex);
    assert_eq!(b_rec.borrow().count(|c| matches!(c, Call::ImportDmabuf(_))), 1);

    // b retiring its import leaves a scanning out its own
    display.release_dmabuf(b, &mut buf).unwrap();
    assert_eq!(display.output(b).unwrap().mode(), ModeKind::Surface);
    assert!(b_rec.borrow().textures.is_empty());
    assert_eq!(display.output(a).unwrap().mode(), ModeKind::Scanout);
    assert!(a_rec.borrow().textures.contains(&a_tex));
    assert!(buf.is_imported());

    display.release_dmabuf(a, &mut buf).unwrap();
    assert!(a_rec.borrow().textures.is_empty());
    assert!(!buf.is_imported());
}
