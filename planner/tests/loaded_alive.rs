use horizon_planner::{
    Driver, Event, Fixed, ModelCheck, Outcome, PlanResult, PlannerOptions, Retry, Strategy, Verdict,
};
use horizon_solver::{Backend, Limit, Solver};
use horizon_syntax::{parse_aspif, Step, Symbol};
use horizon_template::{compile, Answer, Template};
use horizon_tracer::Trace;

const LOADED_ALIVE: &str = include_str!("../../demos/loaded_alive.aspif");

fn sym(s: &str) -> Symbol {
    s.parse().unwrap()
}

fn template(text: &str) -> Template {
    let mut engine = Solver::new(Limit::default(), Trace::none());
    engine.load(parse_aspif(text).unwrap()).unwrap();
    compile(&mut engine, Trace::none()).unwrap()
}

fn ignore(_: Event) {}

fn loaded() -> String {
    LOADED_ALIVE.replace("4 25 init(holds(loaded,false)) 1 7", "4 24 init(holds(loaded,true)) 1 7")
}

fn options(strategy: Strategy, start: Step, inc: Step) -> PlannerOptions {
    PlannerOptions {
        strategy,
        start,
        inc,
        limit: 10,
        restarts_per_solve: 0,
        ..Default::default()
    }
}

fn new_driver(text: &str, options: &PlannerOptions) -> Driver<Solver, Fixed> {
    let backend = Solver::new(options.solve_limit(), Trace::none());
    Driver::new(template(text), backend, Fixed(0), options, Trace::none()).unwrap()
}

/// Exactly one value per fluent at every step up to `length`.
fn total(answer: &Answer, length: Step) {
    for step in 0..=length {
        for fluent in ["loaded", "alive"] {
            let values = answer
                .at(step)
                .filter(|l| l.name() == Some("holds") && l.arguments()[0] == Symbol::constant(fluent))
                .count();
            assert_eq!(values, 1, "{} at step {}", fluent, step);
        }
    }
}

#[test]
fn load_then_shoot() {
    let options = options(Strategy::Linear { size: 1 }, 1, 1);
    let mut driver = new_driver(LOADED_ALIVE, &options);
    let mut outcomes = Vec::new();
    let result = driver
        .run(|event| {
            if let Event::Outcome { length, outcome } = event {
                outcomes.push((length, outcome));
            }
        })
        .unwrap();
    assert_eq!(outcomes, vec![(1, Outcome::Unsatisfiable), (2, Outcome::Satisfiable)]);
    let PlanResult::Found { length, answer } = result else {
        panic!("no plan found");
    };
    assert_eq!(length, 2);
    assert!(answer.contains(1, &sym("occurs(load)")));
    assert!(answer.contains(2, &sym("occurs(shoot)")));
    assert!(answer.contains(2, &sym("holds(alive,false)")));
    total(&answer, 2);
    assert_eq!(driver.steps(), 2);
    assert_eq!(driver.stats().solves, 2);
}

#[test]
fn shoot_when_loaded() {
    let options = options(Strategy::Linear { size: 1 }, 1, 1);
    let mut driver = new_driver(&loaded(), &options);
    let result = driver.run(|_| ()).unwrap();
    let PlanResult::Found { length, answer } = result else {
        panic!("no plan found");
    };
    assert_eq!(length, 1);
    assert!(answer.contains(1, &sym("occurs(shoot)")));
    assert!(answer.symbols().any(|s| s == sym("occurs(shoot,1)")));
    assert!(answer.contains(0, &sym("holds(loaded,true)")));
    total(&answer, 1);
}

#[test]
fn effort_scheduler_finds_a_plan() {
    let options = options(Strategy::Effort { gamma: 0.9 }, 0, 2);
    let mut driver = new_driver(LOADED_ALIVE, &options);
    let result = driver.run(|_| ()).unwrap();
    let PlanResult::Found { length, answer } = result else {
        panic!("no plan found");
    };
    assert_eq!(length, 2);
    assert!(answer.contains(2, &sym("occurs(shoot)")));
    total(&answer, 2);
}

#[test]
fn shorter_lengths_reuse_the_grounding() {
    let options = options(Strategy::Linear { size: 1 }, 1, 1);
    let mut driver = new_driver(LOADED_ALIVE, &options);
    let attempt = driver.attempt(3, &mut ignore).unwrap();
    assert_eq!(attempt.outcome, Outcome::Satisfiable);
    let rules = driver.backend().rule_count();
    assert_eq!(driver.attempt(1, &mut ignore).unwrap().outcome, Outcome::Unsatisfiable);
    let attempt = driver.attempt(2, &mut ignore).unwrap();
    assert_eq!(attempt.outcome, Outcome::Satisfiable);
    let answer = attempt.answer.unwrap();
    assert!(answer.contains(2, &sym("occurs(shoot)")));
    assert!(answer.at(3).next().is_none());
    assert_eq!(driver.attempt(0, &mut ignore).unwrap().outcome, Outcome::Unsatisfiable);
    assert_eq!(driver.steps(), 3);
    assert_eq!(driver.backend().rule_count(), rules);
    assert_eq!(driver.attempt(3, &mut ignore).unwrap().outcome, Outcome::Satisfiable);
}

#[test]
fn memory_admission() {
    let options = PlannerOptions {
        memory_limit: Some(30),
        step_memory: 5,
        ..options(Strategy::Linear { size: 2 }, 1, 1)
    };
    let backend = Solver::new(options.solve_limit(), Trace::none());
    let mut driver = Driver::new(template(LOADED_ALIVE), backend, Fixed(10), &options, Trace::none()).unwrap();
    assert_eq!(driver.attempt(4, &mut ignore).unwrap().outcome, Outcome::Satisfiable);
    let rules = driver.backend().rule_count();
    let attempt = driver.attempt(9, &mut ignore).unwrap();
    assert_eq!(attempt.outcome, Outcome::OutOfMemory);
    assert!(attempt.answer.is_none());
    assert_eq!(driver.steps(), 4);
    assert_eq!(driver.backend().rule_count(), rules);
    assert_eq!(driver.attempt(5, &mut ignore).unwrap().outcome, Outcome::Satisfiable);
    assert_eq!(driver.steps(), 5);
    assert_eq!(driver.stats().out_of_memory, 1);

    let options = PlannerOptions {
        memory_limit: Some(5),
        ..options
    };
    let backend = Solver::new(options.solve_limit(), Trace::none());
    let mut driver = Driver::new(template(LOADED_ALIVE), backend, Fixed(10), &options, Trace::none()).unwrap();
    assert_eq!(driver.run(|_| ()).unwrap(), PlanResult::NotFound);
    assert_eq!(driver.steps(), 0);
    assert_eq!(driver.stats().out_of_memory, 2);
}

/// Rejects every plan that loads at step 1.
struct NoEarlyLoad;

impl ModelCheck for NoEarlyLoad {
    fn check(&mut self, answer: &Answer, _: Step) -> Verdict {
        let load = sym("occurs(load)");
        if answer.contains(1, &load) {
            Verdict::Reject(vec![(1, load)])
        } else {
            Verdict::Accept
        }
    }
}

/// Rejects every plan, blocking all its actions.
struct Never;

impl ModelCheck for Never {
    fn check(&mut self, answer: &Answer, _: Step) -> Verdict {
        Verdict::Reject(
            answer
                .atoms
                .iter()
                .filter(|(_, l)| l.name() == Some("occurs"))
                .cloned()
                .collect(),
        )
    }
}

#[test]
fn rejected_plans() {
    let options = options(Strategy::Linear { size: 1 }, 1, 1);
    let mut driver = new_driver(LOADED_ALIVE, &options).with_check(Box::new(NoEarlyLoad));
    let attempt = driver.attempt(2, &mut ignore).unwrap();
    assert_eq!(attempt.outcome, Outcome::Unsatisfiable);
    assert_eq!(driver.stats().rejected, 1);
    let attempt = driver.attempt(3, &mut ignore).unwrap();
    assert_eq!(attempt.outcome, Outcome::Satisfiable);
    assert!(!attempt.answer.unwrap().contains(1, &sym("occurs(load)")));

    let mut driver = new_driver(LOADED_ALIVE, &options).with_check(Box::new(Never));
    assert_eq!(driver.attempt(3, &mut ignore).unwrap().outcome, Outcome::Unknown);
    assert_eq!(driver.stats().rejected, 2);

    let options = PlannerOptions {
        retry: Retry::UntilNotSat { max: 100 },
        ..options
    };
    let mut driver = new_driver(LOADED_ALIVE, &options).with_check(Box::new(Never));
    assert_eq!(driver.attempt(2, &mut ignore).unwrap().outcome, Outcome::Unsatisfiable);
    assert_eq!(driver.stats().rejected, 1);
}

#[test]
fn missing_query() {
    let text = LOADED_ALIVE.replace("4 5 query 1 19", "4 5 ready 1 19");
    let options = PlannerOptions::default();
    let backend = Solver::new(options.solve_limit(), Trace::none());
    let error = Driver::new(template(&text), backend, Fixed(0), &options, Trace::none()).err();
    assert_eq!(
        error.map(|e| e.to_string()),
        Some(String::from("the template has no external labelled query"))
    );
}
