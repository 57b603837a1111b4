//! Runnable walkthroughs of every composition primitive.
//!
//! Each scenario builds a small task graph over a [`LocationService`], waits
//! for it, checks the result against the expected address and returns a
//! one-line description of what it observed.

use anyhow::{ensure, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FailureKind;
use crate::geocoding::Address;
use crate::lookup::{LocationService, OutcomeChooser, INJECTED_FAILURE};
use crate::task::Task;

/// Everything a scenario needs
pub struct ScenarioContext {
    pub service: LocationService,
    /// What the fetcher is expected to answer for the service's position
    pub expected: Address,
    /// Picks the branch of `success-gated-combine`
    pub chooser: Box<dyn OutcomeChooser>,
}

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    run: fn(&ScenarioContext) -> Result<String>,
}

impl Scenario {
    pub fn run(&self, ctx: &ScenarioContext) -> ScenarioReport {
        log::debug!("Running scenario {}", self.name);
        match (self.run)(ctx) {
            Ok(detail) => ScenarioReport {
                name: self.name.to_string(),
                success: true,
                detail: Some(detail),
                error: None,
            },
            Err(e) => {
                log::warn!("Scenario {} failed: {:#}", self.name, e);
                ScenarioReport {
                    name: self.name.to_string(),
                    success: false,
                    detail: None,
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

/// Result of running one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub success: bool,
    /// What the scenario observed
    pub detail: Option<String>,
    /// Why it failed
    pub error: Option<String>,
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "completed-value",
        description: "An already completed task returns its value immediately",
        run: completed_value,
    },
    Scenario {
        name: "blocking-country",
        description: "Waiting on a task blocks until a worker pushes the country",
        run: blocking_country,
    },
    Scenario {
        name: "run-async-side-effect",
        description: "A unit task's side effect is visible once it is awaited",
        run: run_async_side_effect,
    },
    Scenario {
        name: "supply-async",
        description: "A task computed on a worker yields its return value",
        run: supply_async,
    },
    Scenario {
        name: "map-country",
        description: "map transforms the country into a sentence",
        run: map_country,
    },
    Scenario {
        name: "accept-country",
        description: "accept consumes the country for a side effect",
        run: accept_country,
    },
    Scenario {
        name: "flat-map-city",
        description: "flat_map chains a dependent task on the city",
        run: flat_map_city,
    },
    Scenario {
        name: "combine-city-country",
        description: "combine merges the city and country tasks",
        run: combine_city_country,
    },
    Scenario {
        name: "wait-all",
        description: "all_of waits for every task before returning",
        run: wait_all,
    },
    Scenario {
        name: "collect-all",
        description: "join_all collects the values of several tasks",
        run: collect_all,
    },
    Scenario {
        name: "collect-all-with-failure",
        description: "One failed task makes join_all fail with its root cause",
        run: collect_all_with_failure,
    },
    Scenario {
        name: "handle-failure",
        description: "handle turns a failure into a value that can be filtered out",
        run: handle_failure,
    },
    Scenario {
        name: "success-gated-combine",
        description: "combine runs only if the city lookup succeeds, otherwise ERROR",
        run: success_gated_combine,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|scenario| scenario.name == name)
}

/// Run the named scenarios in order, or all of them when `names` is empty
pub fn run_scenarios(ctx: &ScenarioContext, names: &[String]) -> Result<Vec<ScenarioReport>> {
    let selected: Vec<&Scenario> = if names.is_empty() {
        SCENARIOS.iter().collect()
    } else {
        names
            .iter()
            .map(|name| find(name).ok_or_else(|| anyhow::anyhow!("Unknown scenario: {}", name)))
            .collect::<Result<_>>()?
    };

    Ok(selected.iter().map(|scenario| scenario.run(ctx)).collect())
}

type Holder = Arc<Mutex<String>>;

fn holder() -> Holder {
    Arc::new(Mutex::new(String::new()))
}

fn read(holder: &Holder) -> String {
    holder
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn write(holder: &Holder, message: String) {
    *holder.lock().unwrap_or_else(PoisonError::into_inner) = message;
}

fn completed_value(_ctx: &ScenarioContext) -> Result<String> {
    let value = Task::completed("Hello".to_string()).wait()?;
    ensure!(value == "Hello", "expected Hello, got {}", value);
    Ok(value)
}

fn blocking_country(ctx: &ScenarioContext) -> Result<String> {
    let country = ctx.service.country().wait()?;
    ensure!(
        country == ctx.expected.country_code,
        "expected {}, got {}",
        ctx.expected.country_code,
        country
    );
    Ok(country)
}

fn run_async_side_effect(ctx: &ScenarioContext) -> Result<String> {
    let message = holder();
    let sink = message.clone();

    ctx.service
        .pool()
        .run_async(move || write(&sink, "Hi".to_string()))
        .wait()?;

    let seen = read(&message);
    ensure!(seen == "Hi", "side effect not visible, holder is {:?}", seen);
    Ok(seen)
}

fn supply_async(ctx: &ScenarioContext) -> Result<String> {
    let returned = ctx
        .service
        .pool()
        .supply_async(|| {
            let message = holder();
            write(&message, "Hi".to_string());
            message
        })
        .wait()?;

    let seen = read(&returned);
    ensure!(seen == "Hi", "expected Hi, got {:?}", seen);
    Ok(seen)
}

fn map_country(ctx: &ScenarioContext) -> Result<String> {
    let sentence = ctx
        .service
        .country()
        .map(|country| format!("You live in {}", country))
        .wait()?;

    let expected = format!("You live in {}", ctx.expected.country_code);
    ensure!(sentence == expected, "expected {:?}, got {:?}", expected, sentence);
    Ok(sentence)
}

fn accept_country(ctx: &ScenarioContext) -> Result<String> {
    let message = holder();
    let sink = message.clone();

    ctx.service
        .country()
        .accept(move |country| write(&sink, country))
        .wait()?;

    let seen = read(&message);
    ensure!(
        seen == ctx.expected.country_code,
        "expected {}, holder is {:?}",
        ctx.expected.country_code,
        seen
    );
    Ok(seen)
}

fn flat_map_city(ctx: &ScenarioContext) -> Result<String> {
    let sentence = ctx
        .service
        .city()
        .flat_map(|city| Task::completed(format!("You live in {}", city)))
        .wait()?;

    let expected = format!("You live in {}", ctx.expected.city);
    ensure!(sentence == expected, "expected {:?}, got {:?}", expected, sentence);
    Ok(sentence)
}

fn combine_city_country(ctx: &ScenarioContext) -> Result<String> {
    let sentence = ctx
        .service
        .city()
        .combine(&ctx.service.country(), |city, country| {
            format!("You live in {}, {}", city, country)
        })
        .wait()?;

    let expected = format!(
        "You live in {}, {}",
        ctx.expected.city, ctx.expected.country_code
    );
    ensure!(sentence == expected, "expected {:?}, got {:?}", expected, sentence);
    Ok(sentence)
}

fn wait_all(ctx: &ScenarioContext) -> Result<String> {
    let city_holder = holder();
    let country_holder = holder();

    let city_sink = city_holder.clone();
    let city = ctx.service.city().map(move |city| {
        write(&city_sink, city.clone());
        city
    });
    let country_sink = country_holder.clone();
    let country = ctx.service.country().map(move |country| {
        write(&country_sink, country.clone());
        country
    });

    Task::all_of([&city, &country]).wait()?;

    let (city, country) = (read(&city_holder), read(&country_holder));
    ensure!(city == ctx.expected.city, "city holder is {:?}", city);
    ensure!(
        country == ctx.expected.country_code,
        "country holder is {:?}",
        country
    );
    Ok(format!("{}, {}", city, country))
}

fn collect_all(ctx: &ScenarioContext) -> Result<String> {
    let results = Task::join_all(&[ctx.service.city(), ctx.service.country()])?;

    ensure!(results.len() == 2, "expected 2 results, got {:?}", results);
    ensure!(results.contains(&ctx.expected.city), "missing city in {:?}", results);
    ensure!(
        results.contains(&ctx.expected.country_code),
        "missing country in {:?}",
        results
    );
    Ok(results.join(", "))
}

fn collect_all_with_failure(ctx: &ScenarioContext) -> Result<String> {
    let tasks = [
        ctx.service.city(),
        ctx.service.country(),
        ctx.service.failure(),
    ];

    match Task::join_all(&tasks) {
        Ok(results) => anyhow::bail!("expected a failure, got {:?}", results),
        Err(e) => {
            let root = e.root_cause().to_string();
            ensure!(
                e.cause().kind() == FailureKind::Semantic,
                "expected a semantic failure, got {:?}",
                e.cause().kind()
            );
            ensure!(root == INJECTED_FAILURE, "unexpected root cause {:?}", root);
            Ok(format!("failed with root cause {:?}", root))
        }
    }
}

fn handle_failure(ctx: &ScenarioContext) -> Result<String> {
    let tasks = [
        ctx.service.city().map(Some),
        ctx.service.country().map(Some),
        ctx.service.failure().handle(|outcome| outcome.ok()),
    ];

    let results: Vec<String> = Task::join_all(&tasks)?.into_iter().flatten().collect();

    ensure!(results.len() == 2, "expected 2 results, got {:?}", results);
    ensure!(results.contains(&ctx.expected.city), "missing city in {:?}", results);
    ensure!(
        results.contains(&ctx.expected.country_code),
        "missing country in {:?}",
        results
    );
    Ok(results.join(", "))
}

fn success_gated_combine(ctx: &ScenarioContext) -> Result<String> {
    let residence = ctx
        .service
        .city_or_failure(ctx.chooser.as_ref())
        .combine(&ctx.service.country(), |city, country| {
            format!("I live in {}, {}", city, country)
        })
        .handle(|outcome| outcome.unwrap_or_else(|_| "ERROR".to_string()))
        .wait()?;

    let success = format!(
        "I live in {}, {}",
        ctx.expected.city, ctx.expected.country_code
    );
    ensure!(
        residence == "ERROR" || residence == success,
        "unexpected residence {:?}",
        residence
    );
    Ok(residence)
}
