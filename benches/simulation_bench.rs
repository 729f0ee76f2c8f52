use criterion::{black_box, criterion_group, criterion_main, Criterion};
use impulse2d::{
    BodyDef, BodyHandle, ContactManifold, JointDef, MassProperties, PhysicsWorld,
    RevoluteJointDef, Vec2, WorldConfig,
};

const RADIUS: f64 = 0.5;

// --- Helper for creating stack benchmarks ---
fn run_circle_stack_bench(world: &mut PhysicsWorld, num_circles: usize) {
    let ground = world
        .create_body(&BodyDef::new_static(Vec2::ZERO))
        .expect("ground body");
    let mut stack = vec![ground];
    for i in 0..num_circles {
        let y_pos = RADIUS + (i as f64 * (RADIUS * 2.1)); // Stack with slight gap
        let def = BodyDef::dynamic(Vec2::new(0.0, y_pos), MassProperties::circle(1.0, RADIUS));
        stack.push(world.create_body(&def).expect("stacked body"));
    }

    // Simulate for a fixed number of steps
    let dt = 1.0 / 60.0;
    let steps = 30;
    for _ in 0..steps {
        let contacts = stack_contacts(world, &stack);
        world.set_contacts(contacts);
        world.step(black_box(dt)).expect("step"); // Use black_box for inputs
    }
}

/// Vertical circle-on-circle contacts, with the ground as the line y = 0.
fn stack_contacts(world: &PhysicsWorld, stack: &[BodyHandle]) -> Vec<ContactManifold> {
    stack
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let upper = world.body(pair[1]).ok()?.position();
            let (point, separation) = if i == 0 {
                (Vec2::new(upper.x, 0.0), upper.y - RADIUS)
            } else {
                let lower = world.body(pair[0]).ok()?.position();
                ((lower + upper) * 0.5, upper.y - lower.y - 2.0 * RADIUS)
            };
            (separation < 0.1).then(|| {
                ContactManifold::new(pair[0], pair[1], Vec2::Y).with_point(point, separation, 0)
            })
        })
        .collect()
}

// --- Helper for creating chain benchmarks ---
fn run_constraint_chain_bench(world: &mut PhysicsWorld, num_links: usize) {
    let link_length = 0.5;

    // Create the anchor point (static)
    let anchor_pos = Vec2::new(0.0, 5.0);
    let anchor = world
        .create_body(&BodyDef::new_static(anchor_pos))
        .expect("anchor body");

    let mut last = anchor;
    let mut current_pos = anchor_pos;
    for _ in 0..num_links {
        let pivot = current_pos;
        current_pos.x += link_length;
        let def = BodyDef::dynamic(current_pos, MassProperties::rod(1.0, link_length));
        let current = world.create_body(&def).expect("link body");

        // Hinge the new link to the previous one at their shared end
        let hinge = RevoluteJointDef::initialize(
            world.body(last).ok(),
            world.body(current).expect("link body"),
            pivot,
        );
        world
            .create_joint(&JointDef::new(Some(last), current, hinge))
            .expect("hinge joint");
        last = current;
    }

    // Simulate
    let dt = 1.0 / 60.0;
    let steps = 30;
    for _ in 0..steps {
        world.step(black_box(dt)).expect("step");
    }
}

// Benchmark for a stack of circles falling under gravity
fn bench_circle_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("circle_stack");

    for num_circles in [10, 100, 500].iter() {
        group.bench_with_input(criterion::BenchmarkId::from_parameter(num_circles), num_circles, |b, &n| {
            b.iter(|| {
                // Fewer iterations for benchmark speed
                let mut world = PhysicsWorld::new(WorldConfig::default().with_iterations(4, 2))
                    .expect("valid config");
                run_circle_stack_bench(&mut world, black_box(n));
            });
        });
    }
    group.finish();
}

// Benchmark for a chain of bodies linked by revolute joints
fn bench_constraint_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("constraint_chain");

    for num_links in [10, 100, 500].iter() {
        group.bench_with_input(criterion::BenchmarkId::from_parameter(num_links), num_links, |b, &n| {
            b.iter(|| {
                let mut world = PhysicsWorld::new(WorldConfig::default()).expect("valid config");
                run_constraint_chain_bench(&mut world, black_box(n));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_circle_stack, bench_constraint_chain);
criterion_main!(benches);
