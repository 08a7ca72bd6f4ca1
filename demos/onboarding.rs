use michi::prelude::*;
use michi::WorkflowConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Profile {
    email: String,
    display_name: String,
}

fn email_step() -> StepDefinition {
    StepDefinition::builder("email")
        .output(schema::typed::<Account>())
        .body(|ctx| {
            let next = ctx.next_handle();
            StepApi::new().action("submit", move |email: Value| {
                next.next(json!({ "email": email }))?;
                Ok(Value::Null)
            })
        })
}

fn verify_step() -> StepDefinition {
    StepDefinition::builder("verify")
        .input(schema::typed::<Account>())
        .output(schema::typed::<Account>())
        .body(|ctx| {
            let account = ctx.input().cloned().unwrap_or(Value::Null);
            let email = account["email"].as_str().unwrap_or_default().to_string();

            ctx.on_transition_in(move || {
                Ok(HookOutput::deferred(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    println!("Verification code sent to {}", email);
                    let cleanup: Cleanup = Box::new(|| println!("Verification code revoked"));
                    Ok(Some(cleanup))
                }))
            });
            ctx.on_transition_out(|| {
                println!("Leaving verification");
                Ok(HookOutput::cleanup(|| println!("Verification reopened")))
            });

            let next = ctx.next_handle();
            StepApi::new().action("confirm", move |code: Value| {
                if code != json!("1234") {
                    return Err(WorkflowError::StepError {
                        step_name: "verify:verify".into(),
                        details: "wrong code".to_string(),
                    });
                }
                next.next(account.clone())?;
                Ok(Value::Null)
            })
        })
}

fn profile_step() -> StepDefinition {
    StepDefinition::builder("profile")
        .input(schema::typed::<Account>())
        .output(schema::typed::<Profile>())
        .store(|| json!({ "display_name": "" }))
        .body(|ctx| {
            let email = ctx
                .input()
                .and_then(|account| account["email"].as_str())
                .unwrap_or_default()
                .to_string();
            let state = ctx.store().map(|s| s.get_state()).unwrap_or(Value::Null);
            let display_name = state["display_name"].clone();

            ctx.effect(Deps::on([display_name.clone()]), {
                let display_name = display_name.clone();
                move || {
                    println!("Preview: {}", display_name);
                    Ok(None)
                }
            });

            let store = ctx.store().cloned();
            let next = ctx.next_handle();
            StepApi::new()
                .field("display_name", display_name.clone())
                .action("rename", move |name: Value| {
                    if let Some(store) = &store {
                        store.update(|state| state["display_name"] = name);
                    }
                    Ok(Value::Null)
                })
                .action("save", move |_| {
                    next.next(json!({ "email": email, "display_name": display_name }))?;
                    Ok(Value::Null)
                })
        })
}

fn done_step() -> StepDefinition {
    StepDefinition::builder("done")
        .input(schema::typed::<Profile>())
        .body(|ctx| {
            let profile = ctx.input().cloned().unwrap_or(Value::Null);
            let next = ctx.next_handle();
            ctx.effect(Deps::Once, move || {
                next.next(profile)?;
                Ok(None)
            });
            StepApi::new()
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (email, verify, profile, done) = (email_step(), verify_step(), profile_step(), done_step());
    let workflow = Workflow::builder()
        .steps([email.clone(), verify.clone(), profile.clone(), done.clone()])
        .config(WorkflowConfig::named("onboarding").with_max_history(10))
        .build()?;

    let email = email.create()?;
    let verify = verify.create()?;
    let profile = profile.create()?;
    let done = done.create()?;
    workflow.register([email.clone(), verify.clone(), profile.clone(), done.clone()])?;
    workflow.connect(&email, &verify)?;
    workflow.connect_unidirectional(&verify, &profile)?;
    workflow.connect(&profile, &done)?;

    let _changes = workflow.subscribe_step_change(|change| {
        let suffix = if change.rebuild { " (rebuild)" } else { "" };
        println!("[{}] {}{}", change.step_id, change.status, suffix);
    });
    let (finished_tx, finished_rx) = tokio::sync::oneshot::channel();
    let finished_tx = Mutex::new(Some(finished_tx));
    let _finish = workflow.on_finish(move |output| {
        if let Some(tx) = finished_tx.lock().take() {
            let _ = tx.send(output.clone());
        }
    });

    workflow.start(&email)?;
    workflow.call("submit", json!("hana@example.com"))?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Changed our mind about the address.
    workflow.go_back()?;
    workflow.call("submit", json!("hana@example.org"))?;

    if let Err(e) = workflow.call("confirm", json!("0000")) {
        println!("Rejected: {}", e);
    }
    workflow.call("confirm", json!("1234"))?;

    match workflow.go_back() {
        Err(WorkflowError::UnidirectionalBack { from, to }) => {
            println!("Cannot return to {} once {} is reached", from, to);
        }
        other => other?,
    }

    workflow.call("rename", json!("Hana"))?;
    println!(
        "Display name is now {}",
        workflow.current_step()?.api.get("display_name").cloned().unwrap_or_default()
    );
    workflow.call("save", Value::Null)?;

    let output = finished_rx.await?;
    println!("Onboarding finished: {}", output);
    println!("{}", serde_json::to_string_pretty(&workflow.internals().snapshot())?);
    Ok(())
}
