//! Exercise generator agent and its fallback template library.
//!
//! The LLM is asked for a complete exercise first. A reply that is missing a
//! required field is a contract violation and is replaced by a template from
//! [`TEMPLATES`], every one of which carries instructions, starter code, test
//! cases, hints and a reference solution for both languages.

use async_trait::async_trait;
use chrono::Utc;
use coach_sandbox::{Language, TestCase};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::progress::MAX_SESSION_MINUTES;
use super::resources;
use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType, Services};
use crate::error::Result;
use crate::models::{clamp_difficulty, Task, TaskType, UserProfile};

const SYSTEM_PROMPT: &str = "You are a programming coach writing one practice exercise. \
Reply with JSON only: {\"title\": string, \"instructions\": string, \"starterCode\": string, \
\"solution\": string, \"hints\": [string], \"testCases\": [{\"name\": string, \"input\": any, \
\"expected\": any}], \"estimatedMinutes\": number}. The learner implements a function named \
`solution` that takes a single argument.";

// ============================================================================
// Template library
// ============================================================================

/// A reusable exercise with reference solutions in every supported language.
#[derive(Debug)]
pub struct ExerciseTemplate {
    /// Stable identifier.
    pub slug: &'static str,
    /// Title shown to the learner.
    pub title: &'static str,
    /// Topic words the template matches.
    pub keywords: &'static [&'static str],
    /// Nominal difficulty.
    pub difficulty: u8,
    /// What to implement.
    pub instructions: &'static str,
    /// Name of the single `solution` parameter.
    pub param: &'static str,
    /// Python reference solution.
    pub python_solution: &'static str,
    /// JavaScript reference solution.
    pub javascript_solution: &'static str,
    /// Progressive hints.
    pub hints: &'static [&'static str],
    /// JSON array of `{name, input, expected}`.
    pub cases: &'static str,
    /// Whether the template is an integrative project.
    pub project: bool,
}

impl ExerciseTemplate {
    /// Parsed test cases.
    #[must_use]
    pub fn test_cases(&self) -> Vec<TestCase> {
        serde_json::from_str(self.cases).unwrap_or_default()
    }

    /// Starter code for `language`.
    #[must_use]
    pub fn starter_code(&self, language: Language) -> String {
        match language {
            Language::Python => format!(
                "def solution({}):\n    # Write your code here\n    return None\n",
                self.param
            ),
            Language::JavaScript => format!(
                "function solution({}) {{\n  // Write your code here\n  return null;\n}}\n",
                self.param
            ),
        }
    }

    /// Reference solution for `language`.
    #[must_use]
    pub const fn solution(&self, language: Language) -> &'static str {
        match language {
            Language::Python => self.python_solution,
            Language::JavaScript => self.javascript_solution,
        }
    }

    /// Instantiates the template as a task.
    #[must_use]
    pub fn to_task(&self, topic: &str, difficulty: u8, language: Language) -> Task {
        Task {
            id: Uuid::new_v4().to_string(),
            module_id: None,
            title: self.title.to_string(),
            task_type: if self.project { TaskType::Project } else { TaskType::Code },
            difficulty,
            topic: topic.to_string(),
            language,
            instructions: self.instructions.to_string(),
            starter_code: self.starter_code(language),
            test_cases: self.test_cases(),
            hints: self.hints.iter().map(|h| (*h).to_string()).collect(),
            solution: self.solution(language).to_string(),
            estimated_minutes: u32::from(difficulty) * 10 + if self.project { 60 } else { 15 },
            resources: Vec::new(),
            day_offset: None,
            created_at: Utc::now(),
        }
    }
}

/// The built-in exercises.
pub static TEMPLATES: &[ExerciseTemplate] = &[
    ExerciseTemplate {
        slug: "sum_numbers",
        title: "Sum a list of numbers",
        keywords: &["basics", "loop", "list", "array", "variable", "number"],
        difficulty: 1,
        instructions: "Write `solution(numbers)` that returns the sum of every number in the list. An empty list sums to 0.",
        param: "numbers",
        python_solution: "def solution(numbers):\n    total = 0\n    for n in numbers:\n        total += n\n    return total\n",
        javascript_solution: "function solution(numbers) {\n  return numbers.reduce((acc, n) => acc + n, 0);\n}\n",
        hints: &[
            "Start with a running total of 0.",
            "Visit every element once and add it to the total.",
        ],
        cases: r#"[{"name":"small list","input":[1,2,3],"expected":6},{"name":"empty list","input":[],"expected":0},{"name":"negatives","input":[-4,10,-1],"expected":5}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "reverse_string",
        title: "Reverse a string",
        keywords: &["string", "text", "basics", "slice"],
        difficulty: 2,
        instructions: "Write `solution(text)` that returns `text` with its characters in reverse order.",
        param: "text",
        python_solution: "def solution(text):\n    return text[::-1]\n",
        javascript_solution: "function solution(text) {\n  return Array.from(text).reverse().join('');\n}\n",
        hints: &[
            "Strings can be indexed from the end.",
            "Build the result one character at a time, starting from the last one.",
        ],
        cases: r#"[{"name":"word","input":"hello","expected":"olleh"},{"name":"empty","input":"","expected":""},{"name":"palindrome","input":"level","expected":"level"}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "count_vowels",
        title: "Count the vowels",
        keywords: &["string", "text", "loop", "condition"],
        difficulty: 3,
        instructions: "Write `solution(text)` that returns how many vowels (a, e, i, o, u, in any case) appear in `text`.",
        param: "text",
        python_solution: "def solution(text):\n    return sum(1 for ch in text.lower() if ch in \"aeiou\")\n",
        javascript_solution: "function solution(text) {\n  let count = 0;\n  for (const ch of text.toLowerCase()) {\n    if ('aeiou'.includes(ch)) {\n      count += 1;\n    }\n  }\n  return count;\n}\n",
        hints: &[
            "Lower-case the text first so you only compare against five letters.",
            "Check each character for membership in \"aeiou\".",
        ],
        cases: r#"[{"name":"mixed word","input":"Programming","expected":3},{"name":"upper case","input":"AEIOU xyz","expected":5},{"name":"empty","input":"","expected":0}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "fizzbuzz",
        title: "FizzBuzz",
        keywords: &["loop", "condition", "control flow", "basics", "modulo"],
        difficulty: 3,
        instructions: "Write `solution(n)` that returns a list of strings for 1..=n: \"Fizz\" for multiples of 3, \"Buzz\" for multiples of 5, \"FizzBuzz\" for multiples of both, and the number itself otherwise.",
        param: "n",
        python_solution: "def solution(n):\n    result = []\n    for i in range(1, n + 1):\n        if i % 15 == 0:\n            result.append(\"FizzBuzz\")\n        elif i % 3 == 0:\n            result.append(\"Fizz\")\n        elif i % 5 == 0:\n            result.append(\"Buzz\")\n        else:\n            result.append(str(i))\n    return result\n",
        javascript_solution: "function solution(n) {\n  const result = [];\n  for (let i = 1; i <= n; i += 1) {\n    if (i % 15 === 0) {\n      result.push('FizzBuzz');\n    } else if (i % 3 === 0) {\n      result.push('Fizz');\n    } else if (i % 5 === 0) {\n      result.push('Buzz');\n    } else {\n      result.push(String(i));\n    }\n  }\n  return result;\n}\n",
        hints: &[
            "The modulo operator tells you whether one number divides another.",
            "Check the \"both\" case before the single cases.",
        ],
        cases: r#"[{"name":"one","input":1,"expected":["1"]},{"name":"three","input":3,"expected":["1","2","Fizz"]},{"name":"five","input":5,"expected":["1","2","Fizz","4","Buzz"]}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "is_palindrome",
        title: "Palindrome check",
        keywords: &["string", "text", "two pointers", "condition"],
        difficulty: 4,
        instructions: "Write `solution(text)` that returns true when `text` reads the same forwards and backwards, ignoring case and every character that is not a letter or digit.",
        param: "text",
        python_solution: "def solution(text):\n    cleaned = [ch.lower() for ch in text if ch.isalnum()]\n    return cleaned == cleaned[::-1]\n",
        javascript_solution: "function solution(text) {\n  const cleaned = text.toLowerCase().replace(/[^a-z0-9]/g, '');\n  return cleaned === Array.from(cleaned).reverse().join('');\n}\n",
        hints: &[
            "Normalise the text first: keep letters and digits, lower-case them.",
            "Compare the cleaned text with its reverse.",
        ],
        cases: r#"[{"name":"sentence","input":"A man, a plan, a canal: Panama","expected":true},{"name":"not a palindrome","input":"hello","expected":false},{"name":"empty","input":"","expected":true}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "word_frequency",
        title: "Word frequency",
        keywords: &["dictionary", "dict", "map", "object", "hash", "string", "collections"],
        difficulty: 5,
        instructions: "Write `solution(text)` that counts how often each lower-cased word appears in `text` and returns a list of `[word, count]` pairs sorted alphabetically by word.",
        param: "text",
        python_solution: "def solution(text):\n    counts = {}\n    for word in text.lower().split():\n        counts[word] = counts.get(word, 0) + 1\n    return [[word, counts[word]] for word in sorted(counts)]\n",
        javascript_solution: "function solution(text) {\n  const counts = new Map();\n  for (const word of text.toLowerCase().split(/\\s+/).filter(Boolean)) {\n    counts.set(word, (counts.get(word) || 0) + 1);\n  }\n  return Array.from(counts.keys()).sort().map((word) => [word, counts.get(word)]);\n}\n",
        hints: &[
            "A dictionary (or Map) from word to count does most of the work.",
            "Sort the words before building the result list.",
        ],
        cases: r#"[{"name":"repeated word","input":"the cat the hat","expected":[["cat",1],["hat",1],["the",2]]},{"name":"case folding","input":"Go go GO","expected":[["go",3]]},{"name":"empty","input":"","expected":[]}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "binary_search",
        title: "Binary search",
        keywords: &["search", "algorithm", "array", "list", "sorting"],
        difficulty: 5,
        instructions: "Write `solution(query)` where `query` has a sorted list `items` and a `target`. Return the index of `target` in `items`, or -1 if it is absent. Aim for O(log n).",
        param: "query",
        python_solution: "def solution(query):\n    items, target = query[\"items\"], query[\"target\"]\n    low, high = 0, len(items) - 1\n    while low <= high:\n        mid = (low + high) // 2\n        if items[mid] == target:\n            return mid\n        if items[mid] < target:\n            low = mid + 1\n        else:\n            high = mid - 1\n    return -1\n",
        javascript_solution: "function solution(query) {\n  const { items, target } = query;\n  let low = 0;\n  let high = items.length - 1;\n  while (low <= high) {\n    const mid = Math.floor((low + high) / 2);\n    if (items[mid] === target) {\n      return mid;\n    }\n    if (items[mid] < target) {\n      low = mid + 1;\n    } else {\n      high = mid - 1;\n    }\n  }\n  return -1;\n}\n",
        hints: &[
            "Keep two indices marking the part of the list that can still hold the target.",
            "Compare with the middle element and discard the half that cannot contain the target.",
        ],
        cases: r#"[{"name":"found","input":{"items":[1,3,5,7,9],"target":7},"expected":3},{"name":"missing","input":{"items":[1,3,5,7,9],"target":4},"expected":-1},{"name":"empty","input":{"items":[],"target":1},"expected":-1}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "two_sum",
        title: "Two sum",
        keywords: &["dictionary", "dict", "map", "hash", "array", "algorithm"],
        difficulty: 6,
        instructions: "Write `solution(query)` where `query` has a list `nums` and a `target`. Return the indices `[i, j]` (i < j) of the two numbers that add up to `target`.",
        param: "query",
        python_solution: "def solution(query):\n    seen = {}\n    for index, value in enumerate(query[\"nums\"]):\n        other = query[\"target\"] - value\n        if other in seen:\n            return [seen[other], index]\n        seen[value] = index\n    return []\n",
        javascript_solution: "function solution(query) {\n  const seen = new Map();\n  for (let index = 0; index < query.nums.length; index += 1) {\n    const other = query.target - query.nums[index];\n    if (seen.has(other)) {\n      return [seen.get(other), index];\n    }\n    seen.set(query.nums[index], index);\n  }\n  return [];\n}\n",
        hints: &[
            "For each number, the partner you need is target minus that number.",
            "Remember the numbers you have already seen and where.",
        ],
        cases: r#"[{"name":"first pair","input":{"nums":[2,7,11,15],"target":9},"expected":[0,1]},{"name":"middle pair","input":{"nums":[3,2,4],"target":6},"expected":[1,2]},{"name":"duplicates","input":{"nums":[3,3],"target":6},"expected":[0,1]}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "valid_parentheses",
        title: "Balanced brackets",
        keywords: &["stack", "string", "data structures", "parsing"],
        difficulty: 6,
        instructions: "Write `solution(text)` that returns true when every bracket in `text` (`()`, `[]`, `{}`) is closed by the matching bracket in the right order.",
        param: "text",
        python_solution: "def solution(text):\n    pairs = {\")\": \"(\", \"]\": \"[\", \"}\": \"{\"}\n    stack = []\n    for ch in text:\n        if ch in \"([{\":\n            stack.append(ch)\n        elif ch in pairs:\n            if not stack or stack.pop() != pairs[ch]:\n                return False\n    return not stack\n",
        javascript_solution: "function solution(text) {\n  const pairs = { ')': '(', ']': '[', '}': '{' };\n  const stack = [];\n  for (const ch of text) {\n    if ('([{'.includes(ch)) {\n      stack.push(ch);\n    } else if (ch in pairs) {\n      if (stack.length === 0 || stack.pop() !== pairs[ch]) {\n        return false;\n      }\n    }\n  }\n  return stack.length === 0;\n}\n",
        hints: &[
            "Push every opening bracket onto a stack.",
            "A closing bracket must match the most recent unmatched opening bracket.",
        ],
        cases: r#"[{"name":"simple","input":"()[]{}","expected":true},{"name":"mismatch","input":"(]","expected":false},{"name":"nested","input":"([{}])","expected":true},{"name":"unclosed","input":"((","expected":false}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "flatten",
        title: "Flatten a nested list",
        keywords: &["recursion", "list", "array", "data structures"],
        difficulty: 6,
        instructions: "Write `solution(items)` that returns a flat list containing every number of the arbitrarily nested list `items`, in order.",
        param: "items",
        python_solution: "def solution(items):\n    flat = []\n    for item in items:\n        if isinstance(item, list):\n            flat.extend(solution(item))\n        else:\n            flat.append(item)\n    return flat\n",
        javascript_solution: "function solution(items) {\n  const flat = [];\n  for (const item of items) {\n    if (Array.isArray(item)) {\n      flat.push(...solution(item));\n    } else {\n      flat.push(item);\n    }\n  }\n  return flat;\n}\n",
        hints: &[
            "A nested list is a smaller version of the same problem.",
            "Call your function on every element that is itself a list.",
        ],
        cases: r#"[{"name":"deep","input":[1,[2,[3,[4]],5]],"expected":[1,2,3,4,5]},{"name":"already flat","input":[1,2],"expected":[1,2]},{"name":"empty lists","input":[[],[[]]],"expected":[]}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "merge_intervals",
        title: "Merge overlapping intervals",
        keywords: &["sorting", "algorithm", "intervals", "array"],
        difficulty: 7,
        instructions: "Write `solution(intervals)` that merges every overlapping `[start, end]` pair and returns the merged intervals sorted by start. Touching intervals overlap.",
        param: "intervals",
        python_solution: "def solution(intervals):\n    merged = []\n    for start, end in sorted(intervals):\n        if merged and start <= merged[-1][1]:\n            merged[-1][1] = max(merged[-1][1], end)\n        else:\n            merged.append([start, end])\n    return merged\n",
        javascript_solution: "function solution(intervals) {\n  const sorted = intervals.map((i) => [...i]).sort((a, b) => a[0] - b[0]);\n  const merged = [];\n  for (const [start, end] of sorted) {\n    const last = merged[merged.length - 1];\n    if (last && start <= last[1]) {\n      last[1] = Math.max(last[1], end);\n    } else {\n      merged.push([start, end]);\n    }\n  }\n  return merged;\n}\n",
        hints: &[
            "Sorting by start puts every overlapping pair next to each other.",
            "Compare each interval only with the last merged one.",
        ],
        cases: r#"[{"name":"mixed","input":[[1,3],[2,6],[8,10],[15,18]],"expected":[[1,6],[8,10],[15,18]]},{"name":"touching","input":[[1,4],[4,5]],"expected":[[1,5]]},{"name":"unsorted","input":[[5,6],[1,2]],"expected":[[1,2],[5,6]]}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "roman_to_int",
        title: "Roman numerals",
        keywords: &["string", "parsing", "dictionary", "map", "algorithm"],
        difficulty: 7,
        instructions: "Write `solution(numeral)` that converts a Roman numeral (I, V, X, L, C, D, M, including subtractive forms such as IV and CM) to an integer.",
        param: "numeral",
        python_solution: "def solution(numeral):\n    values = {\"I\": 1, \"V\": 5, \"X\": 10, \"L\": 50, \"C\": 100, \"D\": 500, \"M\": 1000}\n    total = 0\n    for i, ch in enumerate(numeral):\n        value = values[ch]\n        if i + 1 < len(numeral) and values[numeral[i + 1]] > value:\n            total -= value\n        else:\n            total += value\n    return total\n",
        javascript_solution: "function solution(numeral) {\n  const values = { I: 1, V: 5, X: 10, L: 50, C: 100, D: 500, M: 1000 };\n  let total = 0;\n  for (let i = 0; i < numeral.length; i += 1) {\n    const value = values[numeral[i]];\n    const next = values[numeral[i + 1]] || 0;\n    total += next > value ? -value : value;\n  }\n  return total;\n}\n",
        hints: &[
            "Map each symbol to its value first.",
            "A symbol followed by a larger one is subtracted instead of added.",
        ],
        cases: r#"[{"name":"additive","input":"III","expected":3},{"name":"mixed","input":"LVIII","expected":58},{"name":"subtractive","input":"MCMXCIV","expected":1994}]"#,
        project: false,
    },
    ExerciseTemplate {
        slug: "grade_report",
        title: "Project: grade report",
        keywords: &["project", "functions", "data", "report", "list", "condition"],
        difficulty: 6,
        instructions: "Mini-project. Write `solution(students)` where `students` is a list of `[name, score]` pairs. Return `[name, letter]` pairs sorted by name, where the letter is A (90+), B (80+), C (70+), D (60+) or F. Split the work into small helper functions.",
        param: "students",
        python_solution: "def letter(score):\n    for threshold, grade in ((90, \"A\"), (80, \"B\"), (70, \"C\"), (60, \"D\")):\n        if score >= threshold:\n            return grade\n    return \"F\"\n\n\ndef solution(students):\n    return [[name, letter(score)] for name, score in sorted(students)]\n",
        javascript_solution: "function letter(score) {\n  const bands = [[90, 'A'], [80, 'B'], [70, 'C'], [60, 'D']];\n  for (const [threshold, grade] of bands) {\n    if (score >= threshold) {\n      return grade;\n    }\n  }\n  return 'F';\n}\n\nfunction solution(students) {\n  return [...students]\n    .sort((a, b) => (a[0] < b[0] ? -1 : a[0] > b[0] ? 1 : 0))\n    .map(([name, score]) => [name, letter(score)]);\n}\n",
        hints: &[
            "Write a helper that turns one score into a letter.",
            "Sort the students by name, then map each pair through the helper.",
            "Check the boundaries: exactly 90 is an A, 59 is an F.",
        ],
        cases: r#"[{"name":"class","input":[["cy",65],["ana",91],["ben",78]],"expected":[["ana","A"],["ben","C"],["cy","D"]]},{"name":"boundaries","input":[["x",90],["y",59]],"expected":[["x","A"],["y","F"]]},{"name":"empty","input":[],"expected":[]}]"#,
        project: true,
    },
];

/// Picks the template that best fits `topic` and `difficulty`.
///
/// Keyword matches dominate; ties go to the closest difficulty. Slugs in
/// `exclude` are skipped unless nothing else is left.
#[must_use]
pub fn pick_template(
    topic: &str,
    difficulty: u8,
    project: bool,
    exclude: &[&str],
) -> &'static ExerciseTemplate {
    let topic = topic.to_lowercase();
    let score = |t: &ExerciseTemplate| {
        let keyword = t.keywords.iter().any(|k| topic.contains(k));
        let distance = i32::from(t.difficulty.abs_diff(difficulty));
        i32::from(keyword) * 10 - distance
    };
    let candidates = || TEMPLATES.iter().filter(|t| t.project == project);
    candidates()
        .filter(|t| !exclude.contains(&t.slug))
        .max_by_key(|t| score(t))
        .or_else(|| candidates().max_by_key(|t| score(t)))
        .unwrap_or(&TEMPLATES[0])
}

// ============================================================================
// Non-code tasks
// ============================================================================

/// Builds a read, watch or quiz task about `topic`.
///
/// Study tasks are not graded by running code, so their `test_cases` are
/// self-check questions: `input` is the question and `expected` describes
/// what a good answer covers. `solution` is a model answer.
#[must_use]
pub fn study_task(task_type: TaskType, topic: &str, difficulty: u8, language: Language) -> Task {
    let (title, instructions, minutes) = match task_type {
        TaskType::Watch => (
            format!("Watch: {topic} in action"),
            format!(
                "Watch the attached video about {topic}. Pause after each example and predict the output before it is shown."
            ),
            20,
        ),
        TaskType::Quiz => (
            format!("Quiz: {topic}"),
            format!(
                "Answer in your own words:\n1. What problem does {topic} solve?\n2. Write a three-line {language} example that uses it.\n3. Name one mistake beginners make with {topic} and how to avoid it."
            ),
            15,
        ),
        _ => (
            format!("Read: introduction to {topic}"),
            format!(
                "Read the attached material about {topic} and write down three things you learned and one question you still have."
            ),
            25,
        ),
    };
    let (test_cases, hints, solution) = study_material(task_type, topic, language);
    Task {
        id: Uuid::new_v4().to_string(),
        module_id: None,
        title,
        task_type,
        difficulty,
        topic: topic.to_string(),
        language,
        instructions,
        starter_code: String::new(),
        test_cases,
        hints,
        solution,
        estimated_minutes: minutes,
        resources: Vec::new(),
        day_offset: None,
        created_at: Utc::now(),
    }
}

fn self_check(name: &str, question: String, answer: String) -> TestCase {
    TestCase::new(name, Value::String(question), Value::String(answer))
}

fn study_material(task_type: TaskType, topic: &str, language: Language) -> (Vec<TestCase>, Vec<String>, String) {
    if task_type == TaskType::Quiz {
        let checks = vec![
            self_check(
                "purpose",
                format!("What problem does {topic} solve?"),
                format!("Names a concrete situation where {topic} removes repetition or makes intent clearer."),
            ),
            self_check(
                "example",
                format!("Write a three-line {language} example that uses {topic}."),
                format!("Runs as written and shows {topic} doing one visible thing."),
            ),
            self_check(
                "pitfall",
                format!("Name one beginner mistake with {topic}."),
                "Describes the mistake, its symptom and the fix.".to_string(),
            ),
        ];
        let hints = vec![
            format!("Think of the last program you wrote that would have been shorter with {topic}."),
            format!("Type your example into a {language} REPL before writing it down."),
        ];
        let solution = format!(
            "1. {topic} lets you express a recurring pattern once instead of repeating it.\n\
             2. A minimal {language} snippet that defines, uses and prints the result of {topic}.\n\
             3. A common mistake is applying {topic} without checking edge cases such as empty input; test the smallest case first."
        );
        return (checks, hints, solution);
    }

    let medium = if task_type == TaskType::Watch { "video" } else { "material" };
    let checks = vec![
        self_check(
            "summary",
            format!("Summarise {topic} in two sentences without looking at the {medium}."),
            format!("Covers what {topic} is and when to use it."),
        ),
        self_check(
            "apply",
            format!("Where could {topic} simplify code you have already written?"),
            "Points to a specific function or loop and how it would change.".to_string(),
        ),
    ];
    let hints = vec![
        format!("Skim the headings of the {medium} first, then go through it properly."),
        "Write your notes as questions; answer them at the end.".to_string(),
    ];
    let solution = format!(
        "{topic} is a building block of everyday {language} code. Good notes name the idea, \
         show one small example, and list the situations where it is the wrong tool."
    );
    (checks, hints, solution)
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmExercise {
    #[serde(default)]
    title: String,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    starter_code: String,
    #[serde(default)]
    solution: String,
    #[serde(default)]
    hints: Vec<String>,
    #[serde(default)]
    test_cases: Vec<TestCase>,
    #[serde(default)]
    estimated_minutes: Option<u32>,
}

/// Generates standalone exercises.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExerciseGeneratorAgent;

#[async_trait]
impl Agent for ExerciseGeneratorAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ExerciseGenerator
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        let AgentRequest::GenerateExercise {
            topic,
            difficulty,
            language,
            task_type,
        } = &ctx.request
        else {
            return Err(unsupported(self.agent_type(), &ctx.request));
        };
        let services = &ctx.services;
        services.store.get_user(&ctx.user_id).await?;
        let profile = services
            .store
            .get_profile(&ctx.user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(&ctx.user_id));

        let topic = topic.trim();
        let topic = if topic.is_empty() { "programming basics" } else { topic };
        let language = language.unwrap_or(profile.preferred_language);
        let difficulty = clamp_difficulty(i32::from(
            difficulty.unwrap_or_else(|| profile.skill_level.base_difficulty()),
        ));
        let task_type = task_type.unwrap_or_default();

        let mut warnings = Vec::new();
        let mut task =
            generate_task(services, topic, difficulty, language, task_type, &mut warnings).await;
        if matches!(task.task_type, TaskType::Read | TaskType::Watch) {
            task.resources = resources::find(services, topic, 3, &mut warnings).await;
        }
        task.validate_complete()?;
        services.store.save_task(&ctx.user_id, &task).await?;
        info!(task_id = %task.id, %topic, difficulty, "Exercise generated");

        AgentResult::ok(&task, warnings)
    }
}

/// Generates one task, trying the LLM before the template library.
pub(crate) async fn generate_task(
    services: &Services,
    topic: &str,
    difficulty: u8,
    language: Language,
    task_type: TaskType,
    warnings: &mut Vec<String>,
) -> Task {
    if !task_type.is_graded_by_code() {
        return study_task(task_type, topic, difficulty, language);
    }

    let prompt = format!(
        "Topic: {topic}\nLanguage: {language}\nDifficulty: {difficulty}/10\nType: {}",
        if task_type == TaskType::Project { "mini-project" } else { "exercise" }
    );
    let response = services.llm.generate(&prompt, SYSTEM_PROMPT).await;
    if let Some(value) = response.json() {
        match from_llm(value, topic, difficulty, language, task_type) {
            Ok(task) => return task,
            Err(reason) => {
                warn!(%reason, "LLM exercise rejected");
                warnings.push(format!("Generated exercise was incomplete ({reason}); used a template instead"));
            }
        }
    } else {
        warnings.push("Exercise taken from the template library; LLM unavailable".to_string());
    }

    let template = pick_template(topic, difficulty, task_type == TaskType::Project, &[]);
    template.to_task(topic, difficulty, language)
}

fn from_llm(
    value: Value,
    topic: &str,
    difficulty: u8,
    language: Language,
    task_type: TaskType,
) -> std::result::Result<Task, String> {
    let exercise: LlmExercise = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let task = Task {
        id: Uuid::new_v4().to_string(),
        module_id: None,
        title: exercise.title,
        task_type,
        difficulty,
        topic: topic.to_string(),
        language,
        instructions: exercise.instructions,
        starter_code: exercise.starter_code,
        test_cases: exercise.test_cases,
        hints: exercise.hints,
        solution: exercise.solution,
        estimated_minutes: exercise
            .estimated_minutes
            .unwrap_or(30)
            .clamp(5, MAX_SESSION_MINUTES),
        resources: Vec::new(),
        day_offset: None,
        created_at: Utc::now(),
    };
    task.validate_complete().map_err(|e| e.to_string())?;
    Ok(task)
}

/// JSON summary of the template library, for diagnostics.
#[must_use]
pub fn catalogue() -> Value {
    Value::Array(
        TEMPLATES
            .iter()
            .map(|t| json!({"slug": t.slug, "difficulty": t.difficulty, "project": t.project}))
            .collect(),
    )
}
