// ABOUTME: Embedded QuickJS sandbox exposing the fixed `java` helper namespace to rule scripts.
// ABOUTME: Rebinds result/baseUrl per evaluation; ajax is SSRF-validated; rule re-entry is depth-limited.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rquickjs::function::{Func, Opt};
use rquickjs::{Context, Ctx, Object, Runtime, Value};
use tracing::{debug, warn};

use crate::resource::validate_public_destination;

/// Synchronous page fetch used by the sandbox's `ajax`. Returns the body
/// text, or `None` on any failure (the script sees `null`).
pub type FetchFn = Box<dyn Fn(&str) -> Option<String>>;

/// Narrow capability handed to the sandbox for `getString`/`getStringList`.
///
/// The implementation evaluates non-script dialects only, which keeps the
/// analyzer↔sandbox dependency one-directional and bounds script recursion
/// at depth one.
pub trait RuleEvaluator {
    fn eval_rule(&self, content: &str, base_url: &str, rule: &str) -> Vec<String>;
}

struct Shared {
    result: RefCell<String>,
    base_url: RefCell<String>,
    vars: RefCell<HashMap<String, String>>,
    fetch: FetchFn,
    evaluator: Box<dyn RuleEvaluator>,
}

impl Shared {
    fn ajax(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if !validate_public_destination(url) {
            warn!(url, "ajax destination rejected");
            return None;
        }
        (self.fetch)(url)
    }
}

/// One sandbox instance per executor. The key/value store (`java.put`/`get`)
/// lives exactly as long as the sandbox; independent executors never share it.
pub struct Sandbox {
    context: Context,
    _runtime: Runtime,
    shared: Rc<Shared>,
}

impl Sandbox {
    pub fn new(fetch: FetchFn, evaluator: Box<dyn RuleEvaluator>) -> anyhow::Result<Self> {
        let runtime = Runtime::new().map_err(|e| anyhow::anyhow!("runtime init: {}", e))?;
        runtime.set_memory_limit(32 * 1024 * 1024);
        runtime.set_max_stack_size(1024 * 1024);
        let context =
            Context::full(&runtime).map_err(|e| anyhow::anyhow!("context init: {}", e))?;

        let shared = Rc::new(Shared {
            result: RefCell::new(String::new()),
            base_url: RefCell::new(String::new()),
            vars: RefCell::new(HashMap::new()),
            fetch,
            evaluator,
        });

        context
            .with(|ctx| -> rquickjs::Result<()> {
                let java = Object::new(ctx.clone())?;

                {
                    let sh = Rc::clone(&shared);
                    java.set(
                        "ajax",
                        Func::from(move |url: String| -> Option<String> { sh.ajax(&url) }),
                    )?;
                }

                java.set(
                    "base64Encode",
                    Func::from(|s: String| STANDARD.encode(s.as_bytes())),
                )?;
                java.set(
                    "base64Decode",
                    Func::from(|s: String| {
                        STANDARD
                            .decode(s.as_bytes())
                            .map(|b| String::from_utf8_lossy(&b).into_owned())
                            .unwrap_or_default()
                    }),
                )?;
                java.set("md5Encode", Func::from(|s: String| md5_hex(&s)))?;
                java.set(
                    "md5Encode16",
                    Func::from(|s: String| md5_hex(&s)[8..24].to_string()),
                )?;
                java.set(
                    "timeFormat",
                    Func::from(|secs: f64| time_format(secs as i64)),
                )?;

                {
                    let sh = Rc::clone(&shared);
                    java.set(
                        "getString",
                        Func::from(move |rule: String, content: Opt<String>| -> String {
                            let content =
                                content.0.unwrap_or_else(|| sh.result.borrow().clone());
                            let base_url = sh.base_url.borrow().clone();
                            sh.evaluator
                                .eval_rule(&content, &base_url, &rule)
                                .into_iter()
                                .next()
                                .unwrap_or_default()
                        }),
                    )?;
                }
                {
                    let sh = Rc::clone(&shared);
                    java.set(
                        "getStringList",
                        Func::from(move |rule: String| -> Vec<String> {
                            let content = sh.result.borrow().clone();
                            let base_url = sh.base_url.borrow().clone();
                            sh.evaluator.eval_rule(&content, &base_url, &rule)
                        }),
                    )?;
                }
                {
                    let sh = Rc::clone(&shared);
                    java.set(
                        "put",
                        Func::from(move |key: String, value: String| -> String {
                            sh.vars.borrow_mut().insert(key, value.clone());
                            value
                        }),
                    )?;
                }
                {
                    let sh = Rc::clone(&shared);
                    java.set(
                        "get",
                        Func::from(move |key: String| -> String {
                            sh.vars.borrow().get(&key).cloned().unwrap_or_default()
                        }),
                    )?;
                }

                // UI-only calls kept as stubs for rule-script compatibility.
                java.set("toast", Func::from(|_msg: String| {}))?;
                java.set(
                    "log",
                    Func::from(|msg: String| {
                        debug!(target: "ruleshelf::script", "{}", msg);
                    }),
                )?;

                ctx.globals().set("java", java)?;
                Ok(())
            })
            .map_err(|e| anyhow::anyhow!("helper registration: {}", e))?;

        Ok(Self {
            context,
            _runtime: runtime,
            shared,
        })
    }

    /// Rebind the `result`/`baseUrl` globals for the next evaluation.
    /// Rebinding does not touch the key/value store.
    pub fn bind(&self, result: &str, base_url: &str) {
        *self.shared.result.borrow_mut() = result.to_string();
        *self.shared.base_url.borrow_mut() = base_url.to_string();
    }

    /// Evaluate a source-supplied script library into the global scope.
    pub fn load_library(&self, source: &str) {
        self.context.with(|ctx| {
            if ctx.eval::<Value, _>(source).is_err() {
                let exc = ctx.catch();
                debug!(error = %describe(&ctx, exc), "script library failed to load");
            }
        });
    }

    /// Run a full script rule (`@js:` body or `<js>...</js>` splice) against
    /// the given content.
    pub fn run_rule(&self, rule: &str, content: &str, base_url: &str) -> Vec<String> {
        self.bind(content, base_url);
        if let Some(script) = rule.trim_start().strip_prefix("@js:") {
            return self.eval_to_strings(script);
        }
        let Some(start) = rule.find("<js>") else {
            return vec![];
        };
        let before = &rule[..start];
        let rest = &rule[start + 4..];
        // Missing closing tag: the remainder is all script, with no suffix.
        let (script, after) = match rest.find("</js>") {
            Some(end) => (&rest[..end], &rest[end + 5..]),
            None => (rest, ""),
        };
        let out = self
            .eval_to_strings(script)
            .into_iter()
            .next()
            .unwrap_or_default();
        let spliced = format!("{}{}{}", before, out, after);
        if spliced.is_empty() {
            vec![]
        } else {
            vec![spliced]
        }
    }

    /// Evaluate a script with `result`/`baseUrl` in scope; coerce the return
    /// value to an ordered string list. Exceptions degrade to empty.
    pub fn eval_to_strings(&self, script: &str) -> Vec<String> {
        self.context.with(|ctx| {
            let globals = ctx.globals();
            let _ = globals.set("result", self.shared.result.borrow().clone());
            let _ = globals.set("baseUrl", self.shared.base_url.borrow().clone());
            match ctx.eval::<Value, _>(script) {
                Ok(value) => coerce_values(&ctx, value),
                Err(_) => {
                    let exc = ctx.catch();
                    debug!(error = %describe(&ctx, exc), "rule script failed");
                    vec![]
                }
            }
        })
    }

    /// Evaluate a URL-template `{{expr}}` with `key`/`page` bound.
    pub fn eval_expr(&self, expr: &str, key: &str, page: i32) -> String {
        self.context.with(|ctx| {
            let globals = ctx.globals();
            let _ = globals.set("key", key.to_string());
            let _ = globals.set("page", page);
            let _ = globals.set("baseUrl", self.shared.base_url.borrow().clone());
            match ctx.eval::<Value, _>(expr) {
                Ok(value) => coerce_value(&ctx, &value).unwrap_or_default(),
                Err(_) => {
                    let exc = ctx.catch();
                    debug!(expr, error = %describe(&ctx, exc), "template expression failed");
                    String::new()
                }
            }
        })
    }
}

fn coerce_values<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Vec<String> {
    if let Some(array) = value.as_array() {
        return array
            .iter::<Value>()
            .filter_map(|item| item.ok())
            .filter_map(|item| coerce_value(ctx, &item))
            .collect();
    }
    coerce_value(ctx, &value).map_or_else(Vec::new, |s| vec![s])
}

fn coerce_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    if value.is_undefined() || value.is_null() {
        return None;
    }
    if let Some(s) = value.as_string() {
        return s.to_string().ok().filter(|s| !s.is_empty());
    }
    if let Some(b) = value.as_bool() {
        return Some(b.to_string());
    }
    if let Some(i) = value.as_int() {
        return Some(i.to_string());
    }
    if let Some(f) = value.as_float() {
        if f.fract() == 0.0 && f.abs() < 1e15 {
            return Some(format!("{}", f as i64));
        }
        return Some(f.to_string());
    }
    // Objects and remaining arrays serialize to JSON text.
    ctx.json_stringify(value.clone())
        .ok()
        .flatten()
        .and_then(|s| s.to_string().ok())
        .filter(|s| !s.is_empty())
}

fn describe<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    coerce_value(ctx, &value).unwrap_or_else(|| "unknown error".to_string())
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn time_format(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y/%m/%d %H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StubEvaluator;

    impl RuleEvaluator for StubEvaluator {
        fn eval_rule(&self, content: &str, _base_url: &str, rule: &str) -> Vec<String> {
            vec![format!("{}:{}", rule, content)]
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox::new(Box::new(|_url| None), Box::new(StubEvaluator)).expect("sandbox")
    }

    #[test]
    fn test_eval_simple_expression() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(sb.eval_to_strings("1 + 1"), vec!["2"]);
    }

    #[test]
    fn test_result_and_base_url_bound() {
        let sb = sandbox();
        sb.bind("CONTENT", "https://example.com/");
        assert_eq!(
            sb.eval_to_strings("result + '|' + baseUrl"),
            vec!["CONTENT|https://example.com/"]
        );
    }

    #[test]
    fn test_array_return_becomes_list() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(sb.eval_to_strings("['a', 'b', 'c']"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_object_return_serializes() {
        let sb = sandbox();
        sb.bind("", "");
        let out = sb.eval_to_strings("({name: 'A'})");
        assert_eq!(out, vec!["{\"name\":\"A\"}"]);
    }

    #[test]
    fn test_exception_degrades_to_empty() {
        let sb = sandbox();
        sb.bind("", "");
        assert!(sb.eval_to_strings("throw new Error('boom')").is_empty());
        assert!(sb.eval_to_strings("not valid js ((").is_empty());
    }

    #[test]
    fn test_md5_helpers() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(
            sb.eval_to_strings("java.md5Encode('hello')"),
            vec!["5d41402abc4b2a76b9719d911017c592"]
        );
        assert_eq!(
            sb.eval_to_strings("java.md5Encode16('hello')"),
            vec!["bc4b2a76b9719d91"]
        );
    }

    #[test]
    fn test_base64_round_trip() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(
            sb.eval_to_strings("java.base64Encode('hello')"),
            vec!["aGVsbG8="]
        );
        assert_eq!(
            sb.eval_to_strings("java.base64Decode('aGVsbG8=')"),
            vec!["hello"]
        );
    }

    #[test]
    fn test_time_format() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(
            sb.eval_to_strings("java.timeFormat(0)"),
            vec!["1970/01/01 00:00"]
        );
    }

    #[test]
    fn test_put_get_store() {
        let sb = sandbox();
        sb.bind("", "");
        assert_eq!(
            sb.eval_to_strings("java.put('k', 'v'); java.get('k')"),
            vec!["v"]
        );
        // A fresh sandbox has a fresh store.
        let other = sandbox();
        other.bind("", "");
        assert!(other.eval_to_strings("java.get('k')").is_empty());
    }

    #[test]
    fn test_get_string_re_enters_evaluator() {
        let sb = sandbox();
        sb.bind("PAGE", "https://example.com/");
        assert_eq!(
            sb.eval_to_strings("java.getString('class.a@text')"),
            vec!["class.a@text:PAGE"]
        );
        assert_eq!(
            sb.eval_to_strings("java.getString('class.a@text', 'OTHER')"),
            vec!["class.a@text:OTHER"]
        );
    }

    #[test]
    fn test_ajax_blocked_destination_returns_null_without_fetching() {
        let called = Rc::new(Cell::new(false));
        let seen = Rc::clone(&called);
        let sb = Sandbox::new(
            Box::new(move |_url| {
                seen.set(true);
                Some("body".to_string())
            }),
            Box::new(StubEvaluator),
        )
        .expect("sandbox");
        sb.bind("", "");

        // Loopback destination: null result, and the fetcher never ran.
        assert!(sb
            .eval_to_strings("java.ajax('http://127.0.0.1/admin')")
            .is_empty());
        assert_eq!(
            sb.eval_to_strings("java.ajax('http://127.0.0.1/admin') === null ? 'null' : 'set'"),
            vec!["null"]
        );
        assert!(!called.get());

        // File scheme likewise.
        assert!(sb
            .eval_to_strings("java.ajax('file:///etc/passwd')")
            .is_empty());
        assert!(!called.get());
    }

    #[test]
    fn test_ajax_allowed_destination_uses_fetcher() {
        let sb = Sandbox::new(
            Box::new(|url| Some(format!("fetched:{}", url))),
            Box::new(StubEvaluator),
        )
        .expect("sandbox");
        sb.bind("", "");
        // example.com resolves publicly (or not at all, which the guard
        // also allows), so the stub fetcher is reached either way.
        assert_eq!(
            sb.eval_to_strings("java.ajax('http://example.com/x')"),
            vec!["fetched:http://example.com/x"]
        );
    }

    #[test]
    fn test_run_rule_js_prefix() {
        let sb = sandbox();
        let out = sb.run_rule("@js:result.toUpperCase()", "abc", "");
        assert_eq!(out, vec!["ABC"]);
    }

    #[test]
    fn test_run_rule_embedded_splice() {
        let sb = sandbox();
        let out = sb.run_rule(
            "https://example.com/page/<js>1 + 1</js>.html",
            "",
            "https://example.com/",
        );
        assert_eq!(out, vec!["https://example.com/page/2.html"]);
    }

    #[test]
    fn test_run_rule_missing_close_tag() {
        let sb = sandbox();
        let out = sb.run_rule("<js>'x' + 'y'", "", "");
        assert_eq!(out, vec!["xy"]);
    }

    #[test]
    fn test_load_library_defines_functions() {
        let sb = sandbox();
        sb.load_library("function shelfTag(s) { return 'tag:' + s; }");
        sb.bind("", "");
        assert_eq!(sb.eval_to_strings("shelfTag('a')"), vec!["tag:a"]);
    }

    #[test]
    fn test_eval_expr_with_key_and_page() {
        let sb = sandbox();
        assert_eq!(sb.eval_expr("(page - 1) * 20", "", 3), "40");
        assert_eq!(sb.eval_expr("key.length", "rust", 1), "4");
    }
}
