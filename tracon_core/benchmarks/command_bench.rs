use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tracon_core::{builtin_catalog, Sim};
use tracon_runtime::{parse_clearance, AircraftSpecifier};

const COMMAND_STRINGS: [&str; 4] = [
    "H180",
    "C080 L20D S210",
    "DCAMRN D/H270 C40",
    "CCAMRN/A60/S210 EI4R CSII4R",
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_clearance");
    for commands in COMMAND_STRINGS {
        group.bench_with_input(BenchmarkId::from_parameter(commands), &commands, |b, commands| {
            b.iter(|| {
                for token in commands.split_whitespace() {
                    let _ = parse_clearance(token, |fix| fix == "CAMRN");
                }
            })
        });
    }
    group.finish();
}

fn bench_run_commands(c: &mut Criterion) {
    let catalog = builtin_catalog().expect("builtin catalog");
    let config = catalog.get("JFK").expect("JFK scenario").clone();
    let mut group = c.benchmark_group("run_aircraft_commands");

    for commands in COMMAND_STRINGS {
        group.bench_with_input(BenchmarkId::from_parameter(commands), &commands, |b, commands| {
            b.iter_batched(
                || {
                    let sim = Sim::new("bench", "JFK", &config);
                    let (_, token) = sim.sign_on("JFK_APP").expect("sign on");
                    (sim, AircraftSpecifier::new(token, "AAL123"))
                },
                |(sim, aircraft)| {
                    let _ = sim.run_aircraft_commands(&aircraft, commands);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(command_benches, bench_parse, bench_run_commands);
criterion_main!(command_benches);
