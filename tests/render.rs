use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mandelpool::{
    BatchId, BatchOutcome, BatchRequest, Config, EscapeTimeKernel, JobKind, Rect, RenderMode,
    Resolution, Scheduler, ThreadSpawner, ViewParams,
};

const CANVAS: Resolution = Resolution {
    width: 64,
    height: 48,
};
const LIMIT: u32 = 200;

type Outcomes = Arc<Mutex<Vec<BatchOutcome>>>;

fn scheduler(mode: RenderMode) -> Scheduler {
    let config = Config {
        worker_count: 2,
        mode,
        ..Config::default()
    };
    let spawner = ThreadSpawner::new(Arc::new(EscapeTimeKernel::new()));
    Scheduler::new(config, Box::new(spawner)).unwrap()
}

fn view(mode: RenderMode) -> ViewParams {
    ViewParams::parse("-0.5", "0", "2", LIMIT, mode).unwrap()
}

fn submit(scheduler: &mut Scheduler, params: ViewParams, canvas: Resolution) -> (BatchId, Outcomes) {
    let outcomes: Outcomes = Arc::new(Mutex::new(vec![]));
    let sink = outcomes.clone();
    let id = scheduler.next_batch_id();
    scheduler.start_batch(id);
    scheduler.register_batch(
        id,
        BatchRequest::new(params, canvas, Rect::grid(canvas, 16), move |outcome| {
            sink.lock().unwrap().push(outcome)
        }),
    );
    (id, outcomes)
}

fn wait_for(scheduler: &mut Scheduler, outcomes: &Outcomes) -> BatchOutcome {
    let deadline = Instant::now() + Duration::from_secs(60);
    while outcomes.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "batch never finished");
        scheduler.poll(Duration::from_millis(20));
    }
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    outcomes[0]
}

fn counts(scheduler: &Scheduler) -> Vec<u32> {
    let mut counts = vec![];
    for y in 0..CANVAS.height {
        for x in 0..CANVAS.width {
            counts.push(
                scheduler
                    .iteration_at(f64::from(x) + 0.5, f64::from(y) + 0.5)
                    .expect("every pixel is covered"),
            );
        }
    }
    counts
}

#[test]
fn normal_mode_renders_every_tile() {
    let mut scheduler = scheduler(RenderMode::Normal);
    assert_eq!(scheduler.worker_count(JobKind::RefOrbit), 0);
    let (id, outcomes) = submit(&mut scheduler, view(RenderMode::Normal), CANVAS);

    match wait_for(&mut scheduler, &outcomes) {
        BatchOutcome::Completed(_) => (),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(scheduler.is_batch_completed(id));
    assert!(scheduler.progress_string().starts_with("Done! ("));

    let tiles = Rect::grid(CANVAS, 16);
    assert_eq!(scheduler.tile_cache().len(), tiles.len());
    for entry in scheduler.tile_cache().entries() {
        assert_eq!(entry.resolution, entry.rect.full_resolution());
    }

    // The middle of the canvas is -0.5: inside the set.
    assert_eq!(scheduler.iteration_at(32.0, 24.0), Some(LIMIT));
    // The top-left corner is far outside it.
    assert!(scheduler.iteration_at(0.0, 0.0).unwrap() < 5);
}

#[test]
fn perturbation_agrees_with_normal_mode() {
    let mut plain = scheduler(RenderMode::Normal);
    let (_, outcomes) = submit(&mut plain, view(RenderMode::Normal), CANVAS);
    wait_for(&mut plain, &outcomes);

    let mut perturbed = scheduler(RenderMode::Perturbation);
    assert_eq!(perturbed.worker_count(JobKind::RefOrbit), 1);
    let (_, outcomes) = submit(&mut perturbed, view(RenderMode::Perturbation), CANVAS);
    match wait_for(&mut perturbed, &outcomes) {
        BatchOutcome::Completed(_) => (),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(perturbed.ref_orbit_cache().get().is_some());

    let (a, b) = (counts(&plain), counts(&perturbed));
    let disagreements = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
    assert!(
        disagreements * 10 <= a.len(),
        "{} of {} pixels disagree",
        disagreements,
        a.len()
    );
}

#[test]
fn a_second_batch_at_the_same_view_reuses_the_orbit() {
    let mut scheduler = scheduler(RenderMode::Perturbation);
    let (_, outcomes) = submit(&mut scheduler, view(RenderMode::Perturbation), CANVAS);
    wait_for(&mut scheduler, &outcomes);
    let first = scheduler.ref_orbit_cache().get().cloned().unwrap();

    scheduler.clear_tiles();
    let (_, outcomes) = submit(&mut scheduler, view(RenderMode::Perturbation), CANVAS);
    wait_for(&mut scheduler, &outcomes);
    let second = scheduler.ref_orbit_cache().get().cloned().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scheduler.tile_cache().len(), Rect::grid(CANVAS, 16).len());
}

#[test]
fn cancelling_mid_render_reports_once_and_goes_quiet() {
    let mut scheduler = scheduler(RenderMode::Normal);
    let big = Resolution::new(512, 512);
    let params = ViewParams::parse("-0.5", "0", "2", 5000, RenderMode::Normal).unwrap();
    let (id, outcomes) = submit(&mut scheduler, params, big);
    scheduler.poll(Duration::from_millis(20));
    scheduler.cancel_batch(id);

    assert_eq!(*outcomes.lock().unwrap(), vec![BatchOutcome::Cancelled]);
    assert!(!scheduler.has_live_batch());

    // Aborted workers report back; none of it lands anywhere.
    let settled = scheduler.tile_cache().len();
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        scheduler.poll(Duration::from_millis(20));
    }
    assert_eq!(scheduler.tile_cache().len(), settled);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
    assert_eq!(scheduler.progress_string(), "");
}

#[test]
fn reconfiguring_mid_render_reports_reconfigured() {
    let mut scheduler = scheduler(RenderMode::Normal);
    let params = ViewParams::parse("-0.5", "0", "2", 5000, RenderMode::Normal).unwrap();
    let (_, outcomes) = submit(&mut scheduler, params, Resolution::new(512, 512));
    scheduler
        .prepare_worker_pool(1, RenderMode::Perturbation)
        .unwrap();
    assert_eq!(*outcomes.lock().unwrap(), vec![BatchOutcome::Reconfigured]);

    let (_, outcomes) = submit(&mut scheduler, view(RenderMode::Perturbation), CANVAS);
    match wait_for(&mut scheduler, &outcomes) {
        BatchOutcome::Completed(_) => (),
        other => panic!("unexpected outcome {:?}", other),
    }
}
