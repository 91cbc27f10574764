// Fixed-point conversion benchmarks.
//
// Covers the conversions a single preview runs (token to USD, fee, USD to
// stable) and decimal parsing at the extremes of token precision.

use alloy_primitives::U256;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use salvage_protocol::fees::{FeeSchedule, TierMode};
use salvage_protocol::math::{
    parse_units, pow10, token_to_usd18, token_to_usd_fixed, usd18_to_token, usd_integer_to_stable, Usd,
};

const E18: u128 = 1_000_000_000_000_000_000;

fn bench_token_to_usd(c: &mut Criterion) {
    let mut group = c.benchmark_group("math/token_to_usd_fixed");
    for decimals in [6u8, 18, 36] {
        let amount = U256::from(123_456_789u64) * pow10(decimals as u32).unwrap();
        let price = U256::from(2 * E18 + 17);
        group.bench_with_input(BenchmarkId::from_parameter(decimals), &decimals, |b, &d| {
            b.iter(|| token_to_usd_fixed(black_box(amount), d, black_box(price)));
        });
    }
    group.finish();
}

fn bench_usd18_round_trip(c: &mut Criterion) {
    let amount = U256::from(987_654_321u64) * U256::from(E18);
    let price = U256::from(600 * E18 + 3);

    c.bench_function("math/usd18_round_trip", |b| {
        b.iter(|| {
            let usd18 = token_to_usd18(black_box(amount), 18, price).ok()?;
            usd18_to_token(usd18, 18, price).ok()
        });
    });
}

fn bench_preview_path(c: &mut Criterion) {
    let schedule = FeeSchedule::from_pairs(
        &[Usd::from_dollars(100), Usd::from_dollars(500), Usd::from_dollars(1000)],
        &[50, 30, 10],
    )
    .ok();
    let price = U256::from(2 * E18);

    c.bench_function("math/preview_path", |b| {
        b.iter(|| {
            let raw = parse_units(black_box("250.5"), 18).ok()?;
            let gross = token_to_usd_fixed(raw, 18, price).ok()?;
            let breakdown = schedule.as_ref()?.breakdown(gross, TierMode::Cap).ok()?;
            usd_integer_to_stable(breakdown.net, 6).ok()
        });
    });
}

fn bench_parse_units(c: &mut Criterion) {
    let mut group = c.benchmark_group("math/parse_units");
    for (label, input, decimals) in [
        ("integer", "1000000", 18u8),
        ("fractional", "0.000000000000000001", 18),
        ("wide", "123456789.123456789123456789123456789", 36),
    ] {
        group.bench_function(label, |b| {
            b.iter(|| parse_units(black_box(input), decimals));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_token_to_usd,
    bench_usd18_round_trip,
    bench_preview_path,
    bench_parse_units,
);
criterion_main!(benches);
