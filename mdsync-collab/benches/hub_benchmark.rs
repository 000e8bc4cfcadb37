use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mdsync_collab::hub::{ConnectionId, Frame, Hub, Registration};
use mdsync_collab::identity::ParticipantIdentity;
use mdsync_collab::protocol::Envelope;
use mdsync_collab::render::{MarkdownRenderer, RenderError, Renderer};
use tokio::sync::mpsc;

/// Keeps rendering out of the fan-out numbers.
struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        Ok(source.to_string())
    }
}

const SAMPLE_DOC: &str = "# Notes\n\nSome *emphasis*, a [link](https://example.com) and a list:\n\n- one\n- two\n- [x] three\n\n| a | b |\n|---|---|\n| 1 | 2 |\n";

fn bench_envelope_decode(c: &mut Criterion) {
    let cursor = Envelope::cursor("user_ABC", 42, "#FF6B6B").encode().unwrap();
    let update = Envelope::update(SAMPLE_DOC).encode().unwrap();

    c.bench_function("decode_cursor", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&cursor)).unwrap()))
    });
    c.bench_function("decode_update", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&update)).unwrap()))
    });
}

fn bench_markdown_render(c: &mut Criterion) {
    let renderer = MarkdownRenderer::new();
    c.bench_function("render_sample_doc", |b| {
        b.iter(|| black_box(renderer.render(black_box(SAMPLE_DOC)).unwrap()))
    });
}

fn bench_cursor_fan_out_100(c: &mut Criterion) {
    let mut hub = Hub::new(PlainRenderer);
    let mut receivers: Vec<mpsc::Receiver<Frame>> = Vec::new();
    let mut sender = None;

    for i in 0..100 {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(1024);
        hub.register(Registration {
            id,
            identity: ParticipantIdentity {
                id: format!("user_{i:03}"),
                color: "#45B7D1".to_string(),
            },
            outbound: tx,
        });
        receivers.push(rx);
        sender.get_or_insert(id);
    }
    let sender = sender.unwrap();
    let frame = Envelope::cursor("user_000", 7, "#45B7D1").encode().unwrap();

    c.bench_function("cursor_fan_out_100_peers", |b| {
        b.iter(|| {
            hub.handle_frame(sender, black_box(frame.clone()));
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

criterion_group!(
    benches,
    bench_envelope_decode,
    bench_markdown_render,
    bench_cursor_fan_out_100,
);
criterion_main!(benches);
