//! ThoughtStream 事件总线
//!
//! - 订阅者按订阅顺序同步回调，回调在触发变更的方法返回前执行完毕
//! - 回调在锁外执行，回调内可以再读取 ThoughtStream
//! - 晚到的订阅者不会收到历史事件
//! - 带过期 run_id 的写入静默丢弃

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agents::AgentId;
use crate::planning::SharedPlan;
use crate::thoughts::{AgentThought, ThoughtStatus, ThoughtStep, ThoughtType};

type Listener = Arc<dyn Fn(&AgentThought) + Send + Sync>;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    current: HashMap<AgentId, AgentThought>,
    listeners: BTreeMap<u64, Listener>,
    next_listener: u64,
}

impl Inner {
    /// 仅当 run_id 仍是该 Agent 的当前请求时返回
    fn live_mut(&mut self, agent: AgentId, run_id: &str) -> Option<&mut AgentThought> {
        self.current
            .get_mut(&agent)
            .filter(|t| t.run_id == run_id)
    }
}

#[derive(Clone)]
pub struct ThoughtStream {
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<AgentThought>,
}

impl Default for ThoughtStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ThoughtStream {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            tx,
        }
    }

    /// 开始新请求：替换该 Agent 之前的 AgentThought，返回新 run_id
    pub fn start(&self, agent: AgentId) -> String {
        let run_id = format!("run_{}", Uuid::new_v4());
        let thought = AgentThought::new(agent, run_id.clone());
        let replaced = {
            let mut inner = self.inner.lock();
            inner.current.insert(agent, thought).is_some()
        };
        if replaced {
            tracing::debug!(agent = %agent, "Previous thought process replaced");
        }
        self.publish(agent, &run_id);
        run_id
    }

    pub fn attach_plan(&self, agent: AgentId, run_id: &str, plan: SharedPlan) {
        let changed = {
            let mut inner = self.inner.lock();
            inner
                .live_mut(agent, run_id)
                .map(|t| t.plan = Some(plan))
                .is_some()
        };
        if changed {
            self.publish(agent, run_id);
        }
    }

    /// 追加一条 thinking 状态的思考，返回其 id（过期 run 返回 None）
    pub fn begin(
        &self,
        agent: AgentId,
        run_id: &str,
        kind: ThoughtType,
        content: impl Into<String>,
    ) -> Option<String> {
        let id = format!("thought_{}", Uuid::new_v4());
        let step = ThoughtStep {
            id: id.clone(),
            kind,
            content: content.into(),
            status: ThoughtStatus::Thinking,
            created_at: Utc::now(),
            duration_ms: None,
            result: None,
        };
        let added = {
            let mut inner = self.inner.lock();
            match inner.live_mut(agent, run_id) {
                Some(t) => {
                    t.thoughts.push(step);
                    t.is_thinking = true;
                    true
                }
                None => false,
            }
        };
        if !added {
            return None;
        }
        self.publish(agent, run_id);
        Some(id)
    }

    /// 结束一条思考；只允许从 thinking 结束一次
    pub fn finish(
        &self,
        agent: AgentId,
        run_id: &str,
        thought_id: &str,
        status: ThoughtStatus,
        result: Option<String>,
    ) -> bool {
        if status == ThoughtStatus::Thinking {
            return false;
        }
        let changed = {
            let mut inner = self.inner.lock();
            inner
                .live_mut(agent, run_id)
                .and_then(|t| t.thoughts.iter_mut().find(|s| s.id == thought_id))
                .filter(|s| s.status == ThoughtStatus::Thinking)
                .map(|s| {
                    s.status = status;
                    s.result = result;
                    s.duration_ms =
                        Some((Utc::now() - s.created_at).num_milliseconds().max(0) as u64);
                })
                .is_some()
        };
        if changed {
            self.publish(agent, run_id);
        }
        changed
    }

    /// 共享 Plan 内容变化（步骤状态等）后通知订阅者
    pub fn notify_progress(&self, agent: AgentId, run_id: &str) {
        let live = self.inner.lock().live_mut(agent, run_id).is_some();
        if live {
            self.publish(agent, run_id);
        }
    }

    /// 请求处理结束
    pub fn complete(&self, agent: AgentId, run_id: &str) {
        let changed = {
            let mut inner = self.inner.lock();
            inner
                .live_mut(agent, run_id)
                .map(|t| t.is_thinking = false)
                .is_some()
        };
        if changed {
            self.publish(agent, run_id);
        }
    }

    pub fn current(&self, agent: AgentId) -> Option<AgentThought> {
        self.inner.lock().current.get(&agent).cloned()
    }

    /// 注册同步回调；返回的 Subscription 被 drop 时自动退订
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AgentThought) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.insert(id, Arc::new(callback));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// 异步接收：慢消费者可能丢失事件（Lagged）
    pub fn subscribe_channel(&self) -> broadcast::Receiver<AgentThought> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn publish(&self, agent: AgentId, run_id: &str) {
        let (thought, listeners) = {
            let inner = self.inner.lock();
            let Some(thought) = inner.current.get(&agent).filter(|t| t.run_id == run_id) else {
                return;
            };
            let listeners: Vec<Listener> = inner.listeners.values().cloned().collect();
            (thought.clone(), listeners)
        };
        for listener in &listeners {
            listener(&thought);
        }
        // 没有通道订阅者时 send 返回 Err，忽略
        let _ = self.tx.send(thought);
    }
}

/// 订阅句柄
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().listeners.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_request_replaces_thought() {
        let stream = ThoughtStream::new();
        let first = stream.start(AgentId::Sales);
        stream.begin(AgentId::Sales, &first, ThoughtType::Analysis, "old");
        let second = stream.start(AgentId::Sales);

        let current = stream.current(AgentId::Sales).unwrap();
        assert_eq!(current.run_id, second);
        assert!(current.thoughts.is_empty());
        assert!(current.is_thinking);
    }

    #[test]
    fn test_stale_run_writes_are_dropped() {
        let stream = ThoughtStream::new();
        let old = stream.start(AgentId::Finance);
        let new = stream.start(AgentId::Finance);
        assert!(stream
            .begin(AgentId::Finance, &old, ThoughtType::Planning, "late")
            .is_none());
        stream.complete(AgentId::Finance, &old);

        let current = stream.current(AgentId::Finance).unwrap();
        assert_eq!(current.run_id, new);
        assert!(current.thoughts.is_empty());
        assert!(current.is_thinking);
    }

    #[test]
    fn test_finish_only_once() {
        let stream = ThoughtStream::new();
        let run = stream.start(AgentId::Research);
        let id = stream
            .begin(AgentId::Research, &run, ThoughtType::Analysis, "classify")
            .unwrap();
        assert!(stream.finish(AgentId::Research, &run, &id, ThoughtStatus::Complete, Some("ok".into())));
        assert!(!stream.finish(AgentId::Research, &run, &id, ThoughtStatus::Failed, None));

        let current = stream.current(AgentId::Research).unwrap();
        let step = current.find(&id).unwrap();
        assert_eq!(step.status, ThoughtStatus::Complete);
        assert_eq!(step.result.as_deref(), Some("ok"));
        assert!(step.duration_ms.is_some());
    }

    #[test]
    fn test_subscribers_called_in_order_and_unsubscribed_on_drop() {
        let stream = ThoughtStream::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let sub1 = stream.subscribe(move |_| o1.lock().push(1));
        let o2 = order.clone();
        let sub2 = stream.subscribe(move |_| o2.lock().push(2));
        assert_eq!(stream.listener_count(), 2);

        stream.start(AgentId::Support);
        assert_eq!(*order.lock(), vec![1, 2]);

        drop(sub1);
        sub2.unsubscribe();
        assert_eq!(stream.listener_count(), 0);
        stream.start(AgentId::Support);
        assert_eq!(order.lock().len(), 2);
    }

    #[test]
    fn test_callback_sees_latest_state() {
        let stream = ThoughtStream::new();
        let thinking_seen = Arc::new(AtomicUsize::new(0));
        let seen = thinking_seen.clone();
        let reader = stream.clone();
        let _sub = stream.subscribe(move |thought| {
            // 回调内可以重入读取
            let current = reader.current(thought.agent_id).unwrap();
            assert_eq!(current.thoughts.len(), thought.thoughts.len());
            if thought
                .last()
                .map(|t| t.status == ThoughtStatus::Thinking)
                .unwrap_or(false)
            {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let run = stream.start(AgentId::Educator);
        stream.begin(AgentId::Educator, &run, ThoughtType::Analysis, "a");
        assert_eq!(thinking_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_receives_changes() {
        let stream = ThoughtStream::new();
        let mut rx = stream.subscribe_channel();
        let run = stream.start(AgentId::Operations);
        stream.complete(AgentId::Operations, &run);

        let first = rx.recv().await.unwrap();
        assert!(first.is_thinking);
        let second = rx.recv().await.unwrap();
        assert!(!second.is_thinking);
    }
}
