use tokio::sync::mpsc;

/// Maps every value of `channel` through `f` into a new channel, dropping `None`s.
/// The forwarding task stops as soon as either end goes away.
pub fn pipe_unbounded_channel<I, O, F>(mut channel: mpsc::UnboundedReceiver<I>, mut f: F) -> mpsc::UnboundedReceiver<O>
where
    I: 'static + Send,
    O: 'static + Send,
    F: 'static + FnMut(I) -> Option<O> + Send
{
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sender.closed() => {
                    // receiver is dropped, drop sender
                    break;
                },

                message_res = channel.recv() => {
                    let message_in = match message_res {
                        Some(message) => message,
                        None => {
                            // previous sender is dropped, drop sender
                            break
                        },
                    };
                    if let Some(message_out) = f(message_in) {
                        if sender.send(message_out).is_err() {
                            break
                        }
                    }
                },
            }
        }
    });
    receiver
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipes_and_filters_values() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut piped = pipe_unbounded_channel(receiver, |n: u32| if n % 2 == 0 { Some(n * 10) } else { None });

        for n in 1..=4 {
            sender.send(n).unwrap();
        }
        drop(sender);

        assert_eq!(piped.recv().await, Some(20));
        assert_eq!(piped.recv().await, Some(40));
        assert_eq!(piped.recv().await, None);
    }
}
