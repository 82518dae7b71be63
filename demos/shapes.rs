//! Introduction to values and handles.
//!
//! This example demonstrates:
//! 1. Holding different shapes as `Value<dyn Shape>` and copying them
//! 2. Observing values through handles and redirecting those handles
//! 3. Narrowing to the concrete type and widening to a supertrait
//! 4. Inline storage and the `tracing` events emitted along the way
//!
//! The subscriber is set up at `TRACE` level, so every storage decision is
//! printed.

use polyval::prelude::*;
use tracing::Level;

trait Named {
    fn name(&self) -> String;
}

trait Shape: Named {
    fn area(&self) -> f64;
    fn scale(&mut self, factor: f64);
}

impl_base!(dyn Named);
impl_base!(dyn Shape);
impl_upcast!(dyn Shape => dyn Named);

#[derive(Clone)]
struct Circle {
    radius: f64,
}

impl Named for Circle {
    fn name(&self) -> String {
        format!("circle(r={})", self.radius)
    }
}

impl Shape for Circle {
    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    fn scale(&mut self, factor: f64) {
        self.radius *= factor;
    }
}

/// Large enough to need its own allocation with the default inline size.
#[derive(Clone)]
struct Polygon {
    points: Vec<(f64, f64)>,
    label: [u8; 32],
}

impl Named for Polygon {
    fn name(&self) -> String {
        let label = String::from_utf8_lossy(&self.label);
        let label = label.trim_end_matches('\0');
        format!("polygon({label}, {} points)", self.points.len())
    }
}

impl Shape for Polygon {
    fn area(&self) -> f64 {
        // Shoelace formula
        let twice: f64 = self
            .points
            .iter()
            .zip(self.points.iter().cycle().skip(1))
            .map(|((x1, y1), (x2, y2))| x1 * y2 - x2 * y1)
            .sum();
        twice.abs() / 2.0
    }

    fn scale(&mut self, factor: f64) {
        for (x, y) in &mut self.points {
            *x *= factor;
            *y *= factor;
        }
    }
}

fn label(text: &str) -> [u8; 32] {
    let mut label = [0; 32];
    let len = text.len().min(label.len());
    label[..len].copy_from_slice(&text.as_bytes()[..len]);
    label
}

fn describe(handle: &Handle<dyn Shape>) {
    let shape = handle.get();
    println!("  {} has area {:.2}", shape.name(), shape.area());
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_target(false)
        .init();

    println!("Example 1: values copy deeply");
    let circle: Value<dyn Shape> = Value::new(Circle { radius: 1.0 });
    let mut bigger = circle.clone();
    bigger.scale(2.0);
    println!("  original: {}, copy: {}", circle.name(), bigger.name());
    println!("  original inline: {}", circle.is_inline());
    println!();

    println!("Example 2: handles observe without owning");
    let square: Value<dyn Shape> = Value::new(Polygon {
        points: vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)],
        label: label("square"),
    });
    println!("  polygon inline: {}", square.is_inline());
    let current = circle.handle();
    describe(&current);
    current.assign_value(&square);
    describe(&current);
    println!("  handles on the square: {}", square.handle_count());
    println!();

    println!("Example 3: narrowing and widening");
    match current.try_downcast::<Circle>() {
        Ok(circle) => println!("  unexpectedly a circle: {}", circle.get().radius),
        Err(error) => println!("  {error}"),
    }
    if let Ok(polygon) = current.try_downcast::<Polygon>() {
        println!("  the square has {} points", polygon.get().points.len());
    }
    let named: Handle<dyn Named> = current.upcast();
    println!("  seen as a name: {}", named.get().name());
    println!();

    println!("Example 4: moving out");
    drop((current, named));
    let boxed: Box<dyn Shape> = square.into_box();
    println!("  boxed {} with area {:.2}", boxed.name(), boxed.area());
}
