use anyhow::{anyhow, Result};
use fxhash::FxHashMap;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{fmt, io::Read};

use solver::{SearchMode, Solver, State};

lazy_static! {
    // Capacity for text input, JSON input can set its own
    static ref DEFAULT_CAPACITY: usize = std::env::var("WATER_SORT_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    static ref BREADTH_FIRST: bool = is_enabled(std::env::var("WATER_SORT_BREADTH_FIRST").ok());
}

// Flags are on for 1/true/yes/on, anything else (including unset) is off
fn is_enabled(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

const TUBE_SEPARATOR: char = '|';
const EMPTY_MARKER: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Color(char);

impl TryFrom<char> for Color {
    type Error = anyhow::Error;

    fn try_from(value: char) -> Result<Self> {
        if value.is_whitespace() || value == TUBE_SEPARATOR || value == EMPTY_MARKER {
            return Err(anyhow!("Invalid color: {value:?}"));
        }

        Ok(Color(value))
    }
}

impl From<Color> for char {
    fn from(value: Color) -> Self {
        value.0
    }
}

// A single tube, the last unit is the top
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Tube {
    capacity: usize,
    units: Vec<Color>,
}

impl Tube {
    fn new(capacity: usize, units: Vec<Color>) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("Tubes must hold at least one unit"));
        }
        if units.len() > capacity {
            return Err(anyhow!(
                "Tube holds {} units, capacity is {capacity}",
                units.len()
            ));
        }

        Ok(Tube { capacity, units })
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn is_full(&self) -> bool {
        self.units.len() == self.capacity
    }

    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    // Vacuously true for an empty tube
    fn is_uniform(&self) -> bool {
        self.units.iter().all(|unit| *unit == self.units[0])
    }

    fn is_missing_one(&self) -> bool {
        self.units.len() + 1 == self.capacity && self.is_uniform()
    }

    fn is_solved(&self) -> bool {
        self.is_full() && self.is_uniform()
    }

    fn top(&self) -> Option<Color> {
        self.units.last().copied()
    }

    fn push(&mut self, unit: Color) -> Result<()> {
        if self.is_full() {
            return Err(anyhow!("Cannot push onto a full tube"));
        }

        self.units.push(unit);
        Ok(())
    }

    fn pop(&mut self) -> Result<Color> {
        self.units
            .pop()
            .ok_or_else(|| anyhow!("Cannot pop from an empty tube"))
    }
}

impl fmt::Display for Tube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.units.iter().map(|c| char::from(*c)).collect::<String>();
        write!(f, "{units:<width$}", width = self.capacity)
    }
}

// Pour from one tube (by index) into another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Pour {
    origin: usize,
    destination: usize,
}

impl fmt::Display for Pour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.origin, self.destination)
    }
}

impl TryFrom<&str> for Pour {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        let (origin, destination) = value
            .split_once('>')
            .ok_or_else(|| anyhow!("Invalid pour: {value}"))?;

        Ok(Pour {
            origin: origin
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid origin in pour: {value}"))?,
            destination: destination
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid destination in pour: {value}"))?,
        })
    }
}

fn parse_pours(line: &str) -> Result<Vec<Pour>> {
    line.split_ascii_whitespace().map(Pour::try_from).collect()
}

// The full puzzle, tubes are identified by their position
// im::Vector shares untouched tubes between a state and the copies made from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Puzzle {
    tubes: im::Vector<Tube>,
}

impl Puzzle {
    fn new(tubes: Vec<Tube>) -> Result<Self> {
        let capacity = tubes
            .first()
            .map(|tube| tube.capacity)
            .ok_or_else(|| anyhow!("A puzzle needs at least one tube"))?;

        if tubes.iter().any(|tube| tube.capacity != capacity) {
            return Err(anyhow!("All tubes must have the same capacity"));
        }

        Ok(Puzzle {
            tubes: tubes.into_iter().collect(),
        })
    }

    // Each tube is a string of colors from bottom to top
    // Surrounding whitespace is padding, an empty string or a lone '-' is an empty tube
    fn from_tubes<T: AsRef<str>>(capacity: usize, tubes: &[T]) -> Result<Self> {
        let tubes = tubes
            .iter()
            .enumerate()
            .map(|(index, tube)| {
                let tube = tube.as_ref().trim();
                let units = if tube == EMPTY_MARKER.to_string() {
                    Vec::new()
                } else {
                    tube.chars()
                        .map(Color::try_from)
                        .collect::<Result<Vec<_>>>()?
                };

                Tube::new(capacity, units).map_err(|err| anyhow!("Tube {index}: {err}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Puzzle::new(tubes)
    }

    // Tubes separated by pipes, as they are displayed: `FHDB|CEEE|CAB |    `
    fn parse(capacity: usize, line: &str) -> Result<Self> {
        let tubes = line
            .trim_end_matches(['\r', '\n'])
            .split(TUBE_SEPARATOR)
            .collect::<Vec<_>>();
        Puzzle::from_tubes(capacity, &tubes)
    }

    fn capacity(&self) -> usize {
        self.tubes[0].capacity
    }

    fn is_legal_move(&self, origin: usize, destination: usize) -> bool {
        if origin == destination {
            return false;
        }

        let (Some(from), Some(to)) = (self.tubes.get(origin), self.tubes.get(destination)) else {
            return false;
        };

        if to.is_full() {
            return false;
        }

        // Nothing to pour or nothing to gain from breaking up a finished tube
        if from.is_empty() || from.is_solved() {
            return false;
        }

        // Moving a uniform tube into an empty one only shuffles it around
        if to.is_empty() {
            return !from.is_uniform();
        }

        // Same for a tube that is one unit short, it gets finished from elsewhere
        if from.is_missing_one() {
            return false;
        }

        from.top() == to.top()
    }

    fn legal_moves(&self) -> Vec<Pour> {
        let mut moves = Vec::new();

        for origin in 0..self.tubes.len() {
            for destination in 0..self.tubes.len() {
                if self.is_legal_move(origin, destination) {
                    moves.push(Pour {
                        origin,
                        destination,
                    });
                }
            }
        }

        moves
    }

    // Keep pouring one unit at a time for as long as the move stays legal
    // Returns how many units moved
    fn pour(&mut self, origin: usize, destination: usize) -> Result<usize> {
        if !self.is_legal_move(origin, destination) {
            return Err(anyhow!("Illegal pour {origin}>{destination} on {self}"));
        }

        let mut moved = 0;
        while self.is_legal_move(origin, destination) {
            let unit = self.tubes[origin].pop()?;
            self.tubes[destination].push(unit)?;
            moved += 1;
        }

        Ok(moved)
    }

    fn is_solved(&self) -> bool {
        self.tubes
            .iter()
            .all(|tube| tube.is_empty() || tube.is_solved())
    }

    fn color_counts(&self) -> FxHashMap<Color, usize> {
        let mut counts = FxHashMap::default();

        for tube in self.tubes.iter() {
            for unit in tube.units.iter() {
                *counts.entry(*unit).or_insert(0) += 1;
            }
        }

        counts
    }
}

impl fmt::Display for Puzzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, tube) in self.tubes.iter().enumerate() {
            if index > 0 {
                write!(f, "{TUBE_SEPARATOR}")?;
            }
            write!(f, "{tube}")?;
        }

        Ok(())
    }
}

impl State<(), Pour> for Puzzle {
    fn is_valid(&self, _global: &()) -> bool {
        self.tubes.iter().all(|tube| tube.len() <= tube.capacity)
    }

    fn is_solved(&self, _global: &()) -> bool {
        Puzzle::is_solved(self)
    }

    fn next_states(&self, _global: &()) -> Option<Vec<(Pour, Puzzle)>> {
        let next_states = self
            .legal_moves()
            .into_iter()
            .map(|pour| {
                let mut next = self.clone();

                // Only legal moves get here, so a failed pour is a bug in the rules
                if let Err(err) = next.pour(pour.origin, pour.destination) {
                    panic!("Legal pour {pour} failed on {self}: {err}");
                }

                (pour, next)
            })
            .collect::<Vec<_>>();

        if next_states.is_empty() {
            None
        } else {
            Some(next_states)
        }
    }

    fn stringify(&self, _global: &()) -> String {
        self.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Definition {
    tubes: Vec<String>,

    #[serde(default)]
    capacity: Option<usize>,

    #[serde(default)]
    solutions: Vec<String>,
}

// Read a puzzle and any known solutions
// Either JSON (see Definition) or a line of tubes followed by one solution per line
fn load(input: &str) -> Result<(Puzzle, Vec<Vec<Pour>>)> {
    if input.trim_start().starts_with('{') {
        let definition: Definition = serde_json::from_str(input)?;
        let capacity = definition.capacity.unwrap_or(*DEFAULT_CAPACITY);

        let puzzle = Puzzle::from_tubes(capacity, &definition.tubes)?;
        let solutions = definition
            .solutions
            .iter()
            .map(|line| parse_pours(line))
            .collect::<Result<Vec<_>>>()?;

        return Ok((puzzle, solutions));
    }

    let mut lines = input.lines().filter(|line| !line.trim().is_empty());

    let puzzle = Puzzle::parse(
        *DEFAULT_CAPACITY,
        lines.next().ok_or_else(|| anyhow!("No puzzle found"))?,
    )?;
    let solutions = lines.map(parse_pours).collect::<Result<Vec<_>>>()?;

    Ok((puzzle, solutions))
}

fn solve(local: Puzzle) -> Option<(Solver<(), Puzzle, Pour>, Puzzle)> {
    let mut solver = Solver::new((), local);
    if *BREADTH_FIRST {
        solver.set_mode(SearchMode::BreadthFirst);
    }

    while let Some(state) = solver.next() {
        if solver.states_checked() % 100000 != 0 {
            continue;
        }
        log::info!("{solver}, state: {state}");
    }

    let Some(solution) = solver.get_solution() else {
        log::error!(
            "No solution found after {} states in {} seconds",
            solver.states_checked(),
            solver.time_spent(),
        );
        return None;
    };

    log::info!(
        "Solved after {} states in {} seconds: {}",
        solver.states_checked(),
        solver.time_spent(),
        solution,
    );

    Some((solver, solution))
}

fn stringify_solution(solver: &Solver<(), Puzzle, Pour>, solved_state: &Puzzle) -> String {
    solver
        .path(solved_state)
        .unwrap_or_default()
        .iter()
        .map(|pour| pour.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

// Apply a list of pours by hand, printing each step
fn replay(puzzle: &Puzzle, instructions: &str) -> Result<Puzzle> {
    let mut local = puzzle.clone();

    for (step, pour) in parse_pours(instructions)?.into_iter().enumerate() {
        let moved = local.pour(pour.origin, pour.destination)?;
        println!("=== Step {step}: {pour} ({moved} moved) ===");
        println!("{local}");
    }

    println!("Is solved? {}", local.is_solved());
    Ok(local)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let (puzzle, solutions) = load(&input)?;

    log::info!("Initial state: {puzzle}");

    let capacity = puzzle.capacity();
    for (color, count) in puzzle.color_counts() {
        if count % capacity != 0 {
            log::warn!(
                "Color {} has {count} units, not a multiple of {capacity}, expect no solution",
                char::from(color)
            );
        }
    }

    // If there is an arg, assume it's a list of pours and replay it
    if std::env::args().len() > 1 {
        for instructions in std::env::args().skip(1) {
            replay(&puzzle, &instructions)?;
        }
        return Ok(());
    }

    // Otherwise, try to find a new solution
    if let Some((solver, solution)) = solve(puzzle) {
        for state in solver.states(&solution).unwrap_or_default() {
            println!("{state}");
        }

        let path = stringify_solution(&solver, &solution);
        println!("{path}");

        // Check against known solutions
        let found = solver.path(&solution).unwrap_or_default();
        if !solutions.is_empty() && !solutions.iter().any(|s| *s == found) {
            log::warn!("Solution does not match known solution")
        }

        return Ok(());
    }

    Err(anyhow!("No solution found"))
}


#[cfg(test)]
mod puzzle_tests {
    use super::*;

    fn puzzle(tubes: &[&str]) -> Puzzle {
        Puzzle::from_tubes(4, tubes).unwrap()
    }

    fn pour(origin: usize, destination: usize) -> Pour {
        Pour {
            origin,
            destination,
        }
    }

    #[test]
    fn test_parse() {
        let puzzle = Puzzle::parse(4, "FHDB|CEEE|CAB |    |-|\n").unwrap();

        assert_eq!(puzzle.tubes.len(), 6);
        assert_eq!(puzzle.to_string(), "FHDB|CEEE|CAB |    |    |    ");
        assert_eq!(puzzle, self::puzzle(&["FHDB", "CEEE", "CAB", "", "", ""]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Puzzle::parse(4, "AB|A B").is_err());
        assert!(Puzzle::parse(4, "ABCDA|").is_err());
        assert!(Puzzle::from_tubes::<&str>(4, &[]).is_err());
    }

    #[test]
    fn test_no_move_onto_itself() {
        let state = puzzle(&["AB", "B", "", "AAAA"]);

        for i in 0..state.tubes.len() {
            assert!(!state.is_legal_move(i, i));
        }
    }

    #[test]
    fn test_out_of_range() {
        let state = puzzle(&["AB", ""]);

        assert!(!state.is_legal_move(0, 2));
        assert!(!state.is_legal_move(5, 0));
    }

    #[test]
    fn test_not_into_full() {
        let state = puzzle(&["A", "BBBA"]);
        assert!(!state.is_legal_move(0, 1));
    }

    #[test]
    fn test_not_from_empty_or_solved() {
        let state = puzzle(&["", "AAAA", "A"]);

        assert!(!state.is_legal_move(0, 2));
        assert!(!state.is_legal_move(1, 2));
    }

    #[test]
    fn test_into_empty() {
        let state = puzzle(&["AB", "BB", ""]);

        assert!(state.is_legal_move(0, 2));
        // Uniform tubes stay put
        assert!(!state.is_legal_move(1, 2));
    }

    #[test]
    fn test_missing_one_stays_put() {
        let state = puzzle(&["AAA", "BA"]);

        assert!(!state.is_legal_move(0, 1));
        assert!(state.is_legal_move(1, 0));
    }

    #[test]
    fn test_top_must_match() {
        let state = puzzle(&["AB", "BA", "CB"]);

        assert!(!state.is_legal_move(0, 1));
        assert!(state.is_legal_move(0, 2));
        assert!(state.is_legal_move(2, 0));
    }

    #[test]
    fn test_legal_moves_order() {
        assert_eq!(
            puzzle(&["AB", "BA", ""]).legal_moves(),
            vec![pour(0, 2), pour(1, 2)]
        );

        assert_eq!(
            puzzle(&["AB", "CB", "B"]).legal_moves(),
            vec![pour(0, 1), pour(0, 2), pour(1, 0), pour(1, 2), pour(2, 0), pour(2, 1)]
        );
    }

    #[test]
    fn test_pour_cascades() {
        let mut state = puzzle(&["ABB", "B"]);

        assert_eq!(state.pour(0, 1).unwrap(), 2);
        assert_eq!(state, puzzle(&["A", "BBB"]));
    }

    #[test]
    fn test_pour_stops_when_full() {
        let mut state = puzzle(&["CBBB", "BB"]);

        assert_eq!(state.pour(0, 1).unwrap(), 2);
        assert_eq!(state, puzzle(&["CB", "BBBB"]));
    }

    #[test]
    fn test_pour_into_empty() {
        let mut state = puzzle(&["ABB", ""]);

        assert_eq!(state.pour(0, 1).unwrap(), 2);
        assert_eq!(state, puzzle(&["A", "BB"]));
    }

    #[test]
    fn test_pour_finishes_tube() {
        let mut state = puzzle(&["BA", "AAA"]);

        assert_eq!(state.pour(0, 1).unwrap(), 1);
        assert_eq!(state, puzzle(&["B", "AAAA"]));
    }

    #[test]
    fn test_illegal_pour() {
        let mut state = puzzle(&["AB", "BA"]);

        assert!(state.pour(0, 1).is_err());
        assert_eq!(state, puzzle(&["AB", "BA"]));
    }

    #[test]
    fn test_pour_leaves_original() {
        let original = puzzle(&["ABB", "", "CCCC"]);
        let mut copy = original.clone();
        copy.pour(0, 1).unwrap();

        assert_eq!(original, puzzle(&["ABB", "", "CCCC"]));
        assert_ne!(original, copy);
    }

    #[test]
    fn test_solved() {
        assert!(puzzle(&["AAAA", "", "BBBB"]).is_solved());
        assert!(puzzle(&["", ""]).is_solved());
        assert!(!puzzle(&["AAAA", "BBB", "B"]).is_solved());
        assert!(!puzzle(&["AABB", ""]).is_solved());
    }

    #[test]
    fn test_order_matters() {
        assert_ne!(puzzle(&["AB", ""]), puzzle(&["", "AB"]));
    }

    #[test]
    fn test_color_counts() {
        let counts = puzzle(&["AAB", "B", "CA"]).color_counts();

        assert_eq!(counts.len(), 3);
        assert_eq!(counts[&Color('A')], 3);
        assert_eq!(counts[&Color('B')], 2);
        assert_eq!(counts[&Color('C')], 1);
    }

    #[test]
    fn test_pour_parse() {
        assert_eq!(Pour::try_from("8>10").unwrap(), pour(8, 10));
        assert_eq!(pour(8, 10).to_string(), "8>10");
        assert!(Pour::try_from("8-10").is_err());
        assert!(Pour::try_from("a>1").is_err());
        assert_eq!(parse_pours(" 0>1  2>3 ").unwrap(), vec![pour(0, 1), pour(2, 3)]);
    }

    #[test]
    fn test_load_text() {
        let (puzzle, solutions) = load("ABAB|BABA|\n\n1>2 0>1\n").unwrap();

        assert_eq!(puzzle, self::puzzle(&["ABAB", "BABA", ""]));
        assert_eq!(solutions, vec![vec![pour(1, 2), pour(0, 1)]]);
    }

    #[test]
    fn test_load_json() {
        let (puzzle, solutions) =
            load(r#"{"tubes": ["AB", "BA", "", ""], "capacity": 2}"#).unwrap();

        assert_eq!(puzzle.capacity(), 2);
        assert_eq!(puzzle.tubes.len(), 4);
        assert!(solutions.is_empty());

        assert!(load(r#"{"tubes": []}"#).is_err());
        assert!(load("").is_err());
    }

    #[test]
    fn test_flags() {
        assert!(is_enabled(Some("1".to_string())));
        assert!(is_enabled(Some(" True ".to_string())));
        assert!(is_enabled(Some("on".to_string())));

        assert!(!is_enabled(None));
        assert!(!is_enabled(Some("0".to_string())));
        assert!(!is_enabled(Some("false".to_string())));
        assert!(!is_enabled(Some("".to_string())));
    }

    #[test]
    fn test_replay() {
        let state = puzzle(&["ABAB", "BABA", ""]);

        let solved = replay(&state, "1>2 0>1 2>0 1>2 0>1 2>0 1>2 0>1 0>2").unwrap();
        assert!(solved.is_solved());

        assert!(replay(&state, "0>1").is_err());
    }
}
