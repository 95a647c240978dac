use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::promise::PromiseState;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value};

use crate::WorkerResponse;

/// Installs the capturing `console` and returns the value renderer.
///
/// The emit hook is removed from the global scope before guest code runs.
const PRELUDE: &str = r#"
(() => {
  const emit = globalThis.__playlet_emit;
  delete globalThis.__playlet_emit;
  const render = (value) => {
    if (value === undefined) return undefined;
    if (typeof value === 'object' && value !== null) {
      try {
        const json = JSON.stringify(value, null, 2);
        if (json !== undefined) return json;
      } catch (_) {}
    }
    return String(value);
  };
  const format = (args) =>
    args.map((arg) => (typeof arg === 'string' ? arg : render(arg) ?? 'undefined')).join(' ');
  const console = {};
  for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
    console[level] = (...args) => emit(format(args));
  }
  globalThis.console = console;
  return render;
})()
"#;

/// Resource limits applied to a single evaluation.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub timeout: Option<Duration>,
    pub memory_limit_bytes: Option<usize>,
}

impl Limits {
    pub fn new(timeout_ms: Option<u64>, memory_limit_mb: Option<u64>) -> Self {
        Self {
            timeout: timeout_ms.map(Duration::from_millis),
            memory_limit_bytes: memory_limit_mb.map(|mb| (mb as usize).saturating_mul(1024 * 1024)),
        }
    }
}

/// Evaluate guest source and capture its observable output.
///
/// Guest failures are reported in the response, never returned as `Err`.
pub fn evaluate(code: &str, limits: &Limits) -> WorkerResponse {
    match run(code, limits) {
        Ok(response) => response,
        Err(e) => WorkerResponse::failure(format!("Interpreter failure: {}", e)),
    }
}

fn run(code: &str, limits: &Limits) -> rquickjs::Result<WorkerResponse> {
    let runtime = Runtime::new()?;
    if let Some(bytes) = limits.memory_limit_bytes {
        runtime.set_memory_limit(bytes);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Some(timeout) = limits.timeout {
        let deadline = Instant::now() + timeout;
        let flag = Arc::clone(&interrupted);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if Instant::now() >= deadline {
                flag.store(true, Ordering::Relaxed);
                true
            } else {
                false
            }
        })));
    }

    let context = Context::full(&runtime)?;
    let logs = Rc::new(RefCell::new(Vec::new()));

    let (result, error) = context.with(|ctx| -> rquickjs::Result<_> {
        let sink = Rc::clone(&logs);
        let emit = Function::new(ctx.clone(), move |line: String| {
            sink.borrow_mut().push(line);
        })?;
        ctx.globals().set("__playlet_emit", emit)?;
        let render: Function = ctx.eval(PRELUDE)?;

        let evaluated = ctx
            .eval::<Value, _>(code)
            .catch(&ctx)
            .and_then(|value| settle(&ctx, value, &interrupted));
        let outcome = match evaluated {
            Ok(value) => match render.call::<_, Option<String>>((value,)).catch(&ctx) {
                Ok(rendered) => (rendered, None),
                Err(caught) => (None, Some(describe(caught, &render, limits))),
            },
            Err(caught) => (None, Some(describe(caught, &render, limits))),
        };
        Ok(outcome)
    })?;

    // Flush promise callbacks so their console output is captured too.
    while !interrupted.load(Ordering::Relaxed) {
        match runtime.execute_pending_job() {
            Ok(true) => continue,
            _ => break,
        }
    }

    let logs = std::mem::take(&mut *logs.borrow_mut());

    if interrupted.load(Ordering::Relaxed) {
        let millis = limits.timeout.map(|t| t.as_millis()).unwrap_or_default();
        return Ok(WorkerResponse {
            result: None,
            error: Some(format!("Execution timed out after {} ms", millis)),
            logs,
            timed_out: true,
        });
    }

    Ok(WorkerResponse {
        result,
        error,
        logs,
        timed_out: false,
    })
}

/// Resolve a promise result to its settled value, or its rejection as a
/// caught throw. Other values pass through.
fn settle<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
    interrupted: &AtomicBool,
) -> Result<Value<'js>, CaughtError<'js>> {
    let Some(promise) = value.as_promise() else {
        return Ok(value);
    };

    while promise.state() == PromiseState::Pending
        && !interrupted.load(Ordering::Relaxed)
        && ctx.execute_pending_job()
    {}

    match promise.result::<Value>() {
        Some(settled) => settled.catch(ctx),
        None => Err(CaughtError::Error(rquickjs::Error::new_from_js_message(
            "promise",
            "value",
            "Promise did not settle",
        ))),
    }
}

/// Turn a caught throw into the message shown to the user.
fn describe<'js>(caught: CaughtError<'js>, render: &Function<'js>, limits: &Limits) -> String {
    if is_out_of_memory(&caught) {
        return match limits.memory_limit_bytes {
            Some(bytes) => format!("Out of memory (limit {} MB)", bytes / (1024 * 1024)),
            None => "Out of memory".to_string(),
        };
    }

    match caught {
        CaughtError::Error(rquickjs::Error::FromJs { message: Some(message), .. }) => message,
        CaughtError::Exception(exception) => {
            let fallback = exception.to_string();
            exception
                .message()
                .filter(|message| !message.is_empty())
                .unwrap_or(fallback)
        }
        CaughtError::Value(value) => render
            .call::<_, Option<String>>((value,))
            .ok()
            .flatten()
            .unwrap_or_else(|| "undefined".to_string()),
        CaughtError::Error(error) => error.to_string(),
    }
}

/// QuickJS throws `null` when it cannot even allocate the error object.
fn is_out_of_memory(caught: &CaughtError<'_>) -> bool {
    match caught {
        CaughtError::Error(rquickjs::Error::Allocation) => true,
        CaughtError::Value(value) => value.is_null(),
        CaughtError::Exception(exception) => exception
            .message()
            .is_some_and(|message| message == "out of memory"),
        CaughtError::Error(_) => false,
    }
}
