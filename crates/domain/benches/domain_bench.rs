use chrono::Utc;
use common::UserId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{Address, Money, Order, OrderItem, OrderStatus};
use std::hint::black_box;

fn cart(items: usize) -> Vec<OrderItem> {
    (0..items)
        .map(|i| {
            let price = Money::parse(&format!("{}.{:02}", i % 500, i % 100), "USD").unwrap();
            OrderItem::new(format!("SKU-{i:05}"), price, (i % 9 + 1) as u32)
        })
        .collect()
}

fn address() -> Address {
    Address {
        street: "1 Bench Way".into(),
        city: "Loadville".into(),
        state: "CA".into(),
        postal_code: "90000".into(),
        country: "US".into(),
    }
}

fn bench_total(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/total_of");
    for size in [1, 10, 100, 1000] {
        let items = cart(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| Order::total_of(black_box(items)).unwrap());
        });
    }
    group.finish();
}

fn bench_place(c: &mut Criterion) {
    let items = cart(25);
    c.bench_function("domain/place_order", |b| {
        b.iter(|| {
            Order::place(UserId::new("bench"), black_box(items.clone()), address(), Utc::now()).unwrap()
        });
    });
}

fn bench_lifecycle(c: &mut Criterion) {
    let order = Order::place(UserId::new("bench"), cart(3), address(), Utc::now()).unwrap();
    c.bench_function("domain/full_lifecycle", |b| {
        b.iter(|| {
            let mut order = order.clone();
            let now = Utc::now();
            for next in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
                order.transition_to(black_box(next), now).unwrap();
            }
            order
        });
    });
}

fn bench_transition_checks(c: &mut Criterion) {
    c.bench_function("domain/transition_table", |b| {
        b.iter(|| {
            let mut allowed = 0;
            for from in OrderStatus::ALL {
                for to in OrderStatus::ALL {
                    if black_box(from).can_transition_to(black_box(to)) {
                        allowed += 1;
                    }
                }
            }
            allowed
        });
    });
}

criterion_group!(
    benches,
    bench_total,
    bench_place,
    bench_lifecycle,
    bench_transition_checks
);
criterion_main!(benches);
